//! Writes synthetic ASRS-style exports for manual runs:
//! `ASRS_train.csv`, `ASRS_dev.csv` and `ASRS_test.csv` in the given
//! directory (default `../ASRS`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const GROUP_ROW: [&str; 7] = ["", "Events", "Events", "Report 1", "", "Report 2", ""];
const FIELD_ROW: [&str; 7] = [
    "ACN",
    "Anomaly",
    "Detector",
    "Narrative",
    "Callback",
    "Narrative",
    "Callback",
];

/// Anomaly value and the vocabulary its narratives are drawn from.
const CLASSES: [(&str, &[&str]); 4] = [
    (
        "Deviation - Altitude Excursion From Assigned Altitude",
        &["climb", "descent", "altitude", "overshot", "level", "bust", "autopilot", "assigned", "FL350"],
    ),
    (
        "Conflict NMAC",
        &["traffic", "TCAS", "RA", "converging", "near", "miss", "advisory", "final", "evasive"],
    ),
    (
        "Inflight Event / Encounter Weather / Turbulence",
        &["turbulence", "convective", "storm", "moderate", "severe", "cells", "radar", "deviation", "ride"],
    ),
    (
        "Deviation - Track / Heading All Types",
        &["heading", "track", "waypoint", "FMS", "course", "turn", "vector", "off", "route"],
    ),
];

const FILLER: [&str; 12] = [
    "we", "the", "crew", "was", "during", "after", "ATC", "captain", "first", "officer", "noticed",
    "then",
];

const DETECTORS: [&str; 3] = ["Person Flight Crew", "Automation Aircraft Other", "Person Air Traffic Control"];

fn sentence(rng: &mut StdRng, vocabulary: &[&str], words: usize) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(words);
    for _ in 0..words {
        let pool = if rng.gen_bool(0.6) { vocabulary } else { &FILLER[..] };
        if let Some(&word) = pool.choose(rng) {
            out.push(word);
        }
    }
    let mut text = out.join(" ");
    text.push('.');
    text
}

fn write_split(path: &Path, reports: usize, first_acn: usize, rng: &mut StdRng) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(GROUP_ROW)?;
    writer.write_record(FIELD_ROW)?;

    for i in 0..reports {
        // Uneven class sizes, so normalization has something to do.
        let class = match rng.gen_range(0..10) {
            0..=3 => 0,
            4..=6 => 1,
            7..=8 => 2,
            _ => 3,
        };
        let (label, vocabulary) = CLASSES[class];

        let mut anomaly = label.to_string();
        if rng.gen_bool(0.15) {
            let (other, _) = CLASSES[(class + 1) % CLASSES.len()];
            anomaly = format!("{anomaly}; {other}");
        }
        let words = rng.gen_range(12..30);
        let narrative = sentence(rng, vocabulary, words);
        let callback = if rng.gen_bool(0.3) {
            let words = rng.gen_range(5..12);
            sentence(rng, vocabulary, words)
        } else {
            String::new()
        };
        let second = if rng.gen_bool(0.2) {
            let words = rng.gen_range(8..20);
            sentence(rng, vocabulary, words)
        } else {
            String::new()
        };
        let detector = DETECTORS.choose(rng).copied().unwrap_or_default();

        writer.write_record([
            (first_acn + i).to_string(),
            anomaly,
            detector.to_string(),
            narrative,
            callback,
            second,
            String::new(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("../ASRS"));
    fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = StdRng::seed_from_u64(42);
    let mut acn = 1_000_000;
    for (split, reports) in [("train", 400), ("dev", 100), ("test", 100)] {
        let path = out_dir.join(format!("ASRS_{split}.csv"));
        write_split(&path, reports, acn, &mut rng)?;
        acn += reports;
        println!("Wrote {reports} reports to {}", path.display());
    }
    Ok(())
}
