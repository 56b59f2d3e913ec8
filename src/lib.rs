pub mod ai;
pub mod analysis;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
pub use pipeline::{Pipeline, PipelineReport};
