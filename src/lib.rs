pub mod config;
pub mod error;
pub mod pipeline;
pub mod sim;
pub mod types;
pub mod ui;

pub use config::PipelineConfig;
pub use error::{FusionError, Result};
