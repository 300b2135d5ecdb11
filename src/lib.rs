//! SPR Analysis - Cleaning, aggregation and mixed-effects modelling for
//! self-paced reading experiments
//!
//! Turns one exported reading-time file into a condition × position chart and
//! a set of mixed-model fits through a deterministic pipeline: row adaptation
//! → accuracy filter → outlier treatment → aggregation → model ladders.
//!
//! ## Modules
//!
//! - **Cleaning**: `schema`, `accuracy`, `outliers`
//! - **Description**: `aggregate`, `plot`
//! - **Inference**: `model` (REML fits along random-effect ladders)

pub mod accuracy;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod model;
pub mod outliers;
pub mod pipeline;
pub mod plot;
pub mod schema;
pub mod types;

// Console logging setup for the binary
#[cfg(feature = "cli")]
pub mod logging;

pub use config::AnalysisConfig;
pub use error::AnalysisError;
pub use pipeline::{analyze_file, AnalysisProcessor, AnalysisReport};

// Schema exports
pub use schema::{RowAdapter, COLUMNS};

/// Crate version embedded in every report
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
