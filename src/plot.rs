use std::fmt::Display;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use plotters::prelude::*;
use serde::Serialize;

use crate::classify::evaluator::RocCurve;
use crate::classify::search::LearningCurve;

const SIZE: (u32, u32) = (800, 600);
const MARGIN: u32 = 20;

// ---------------------------------------------------------------------------
// Colours
// ---------------------------------------------------------------------------

/// `n` visually distinct colours using evenly spaced hues.
pub fn series_palette(n: usize) -> Vec<HSLColor> {
    (0..n)
        .map(|i| HSLColor(i as f64 / n as f64, 0.75, 0.45))
        .collect()
}

fn draw_err<E: Display>(err: E) -> anyhow::Error {
    anyhow!("drawing failed: {err}")
}

/// Path of the CSV written next to an image.
fn companion_csv(image: &Path) -> PathBuf {
    image.with_extension("csv")
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ROC
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RocRow {
    fpr: f64,
    tpr: f64,
    threshold: f64,
}

/// Render the ROC curve with the chance diagonal to `path`, and its points
/// (plus the AUC in the log) to a CSV beside it.
pub fn plot_roc(curve: &RocCurve, path: &Path) -> Result<()> {
    {
        let root = BitMapBackend::new(path, SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(MARGIN)
            .build_cartesian_2d(0f64..1f64, 0f64..1f64)
            .map_err(draw_err)?;

        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(0.0, 0.0), (1.0, 1.0)],
                BLACK.stroke_width(1),
            )))
            .map_err(draw_err)?;
        chart
            .draw_series(LineSeries::new(
                [(0.0, 0.0), (1.0, 1.0)],
                BLACK.mix(0.4).stroke_width(1),
            ))
            .map_err(draw_err)?;

        let colors = series_palette(1);
        chart
            .draw_series(LineSeries::new(
                curve.fpr.iter().copied().zip(curve.tpr.iter().copied()),
                colors[0].stroke_width(2),
            ))
            .map_err(draw_err)?;
        root.present().map_err(draw_err)?;
    }
    log::info!("ROC curve (area = {:.2}) written to {}", curve.auc, path.display());

    let points = curve
        .fpr
        .iter()
        .zip(&curve.tpr)
        .zip(&curve.thresholds)
        .map(|((&fpr, &tpr), &threshold)| RocRow {
            fpr,
            tpr,
            threshold,
        });
    write_rows(&companion_csv(path), points)
}

// ---------------------------------------------------------------------------
// Learning curve
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct LearningCurveRow {
    train_size: usize,
    train_mean: f64,
    train_std: f64,
    test_mean: f64,
    test_std: f64,
    fit_time_mean: f64,
}

/// Render training and cross-validation accuracy against the training-set
/// size. Each mean is drawn with thin lines one standard deviation away.
pub fn plot_learning_curve(curve: &LearningCurve, path: &Path) -> Result<()> {
    let train = curve.train_summary();
    let test = curve.test_summary();
    let fit_times = curve.fit_time_summary();
    let max_size = curve.train_sizes.iter().copied().max().unwrap_or(1).max(1) as f64;

    {
        let root = BitMapBackend::new(path, SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(MARGIN)
            .build_cartesian_2d(0f64..max_size, 0f64..1.01f64)
            .map_err(draw_err)?;
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(0.0, 0.0), (max_size, 1.01)],
                BLACK.stroke_width(1),
            )))
            .map_err(draw_err)?;

        let sizes: Vec<f64> = curve.train_sizes.iter().map(|&s| s as f64).collect();
        for (summary, color) in [&train, &test].into_iter().zip(series_palette(2)) {
            let band = |offset: f64| {
                sizes
                    .iter()
                    .zip(summary.iter())
                    .map(move |(&x, &(mean, std))| (x, mean + offset * std))
                    .collect::<Vec<_>>()
            };
            for offset in [-1.0, 1.0] {
                chart
                    .draw_series(LineSeries::new(band(offset), color.mix(0.4).stroke_width(1)))
                    .map_err(draw_err)?;
            }
            chart
                .draw_series(LineSeries::new(band(0.0), color.stroke_width(2)))
                .map_err(draw_err)?;
        }
        root.present().map_err(draw_err)?;
    }
    log::info!("Learning curve plotted to {}", path.display());

    let rows = curve
        .train_sizes
        .iter()
        .zip(train.iter().zip(&test))
        .zip(&fit_times)
        .map(|((&train_size, (&(train_mean, train_std), &(test_mean, test_std))), &(fit_time_mean, _))| {
            LearningCurveRow {
                train_size,
                train_mean,
                train_std,
                test_mean,
                test_std,
                fit_time_mean,
            }
        });
    write_rows(&companion_csv(path), rows)
}
