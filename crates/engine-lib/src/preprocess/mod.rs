//! Preprocessing shared by training and inference
//!
//! This module provides:
//! - Cleaning with fixed defaults for missing or unrealistic values
//! - Dataset loading (CSV, JSON, JSON lines) with the original column names
//! - Seeded train/test splitting

mod clean;
mod dataset;

pub use clean::{clean_batch, clean_record, median, retain_labelled};
pub use dataset::{load_dataset, train_test_split, DatasetFormat};
