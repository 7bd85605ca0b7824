//! Configuration resolution, environment gathering, and stream-error
//! formatting — the ambient layer shared by the `cli` binary and
//! `smithers-engine`.

pub mod config;
pub mod environment;
pub mod errors;
pub mod model_registry;

pub use config::{lookup_api_key, AppConfig, CompactionSettings};
pub use environment::EnvironmentContext;
pub use errors::format_stream_error;
pub use model_registry::{ModelLimits, ModelRegistry};
