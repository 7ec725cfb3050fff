// src/lib.rs

//! planwatch: resumable permit and plan record sync with daily change reports.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{AppError, FetchError, Result};
pub use models::Config;
pub use pipeline::{RunOptions, RunSummary, run_pipeline};
