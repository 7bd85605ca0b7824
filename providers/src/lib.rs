//! Provider Stream Drivers and the Provider Multiplexer.
//!
//! One driver per vendor wire format, all exposing the same non-blocking
//! `start / poll / text / tool_calls / cleanup` surface defined in
//! [`driver::StreamingState`]. Dispatch on the resolved model's provider
//! lives in [`multiplexer`].

pub mod claude;
pub mod continuation;
pub mod driver;
pub mod gemini;
pub mod http;
pub mod multiplexer;
pub mod openai;
pub mod retry;
pub mod sse;

pub use continuation::Continuation;
pub use driver::{DriverError, PollOutcome, StreamingState};
pub use multiplexer::{complete_once, start_round, ApiConfig, ApiConfigError};
