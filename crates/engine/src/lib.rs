//! Engine library for metadata-driven time-series modeling
//!
//! This crate provides the core functionality for:
//! - Resolving datacenter metadata selections into concrete device mappings
//! - Compiling and executing time-series store queries
//! - Shaping raw results into typed, unit-converted series tables
//! - The invertible node transform pipeline around a predictive model
//! - Writing transformed results back to the store

pub mod config;
pub mod error;
pub mod metadata;
pub mod model;
pub mod nodes;
pub mod pipeline;
pub mod query;
pub mod series;
pub mod tsdb;
pub mod write;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use metadata::{resolve, DatacenterMetadata, DeviceType, Selection};
pub use pipeline::ModelPipeline;
pub use series::{SeriesKey, SeriesTable, Value};
