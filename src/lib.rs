pub mod collector;
pub mod common;
pub mod config;
pub mod exposition;
pub mod github;
pub mod observability;
pub mod observation;
pub mod publisher;
pub mod scheduler;

pub use common::error::{ExporterError, Result};
