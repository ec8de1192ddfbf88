//! Core library: image set resolution, batched provider runs, aggregation, and export.

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod resolver;

pub use error::TaggerError;
