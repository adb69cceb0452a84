//! Feature extraction: report text assembly, label encoding and TF-IDF
//! vectors.

pub mod preprocess;
pub mod tfidf;
