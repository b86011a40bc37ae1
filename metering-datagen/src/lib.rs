pub mod config;
pub mod generate;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod verify;

pub use pipeline::{Pipeline, PipelineError, RunSummary, Sink};
