//! Streaming handler for chat-completion responses delivered over
//! server-sent events.
//!
//! A [`StreamAccumulator`] receives decoded SSE frames, appends each delta's
//! text to a running transcript and reports fragments, completion and failure
//! through caller-supplied handlers.
//!
//! ```no_run
//! use chat_stream::prelude::*;
//!
//! # async fn run(response: reqwest::Response) {
//! let mut accumulator = StreamAccumulator::new(
//!     |fragment| print!("{fragment}"),
//!     |error, body| eprintln!("stream failed: {error} {body}"),
//! )
//! .on_complete(|transcript| println!("\n({} bytes)", transcript.len()));
//!
//! drive_response(response, &mut accumulator).await;
//! # }
//! ```

/// Transcript accumulation state machine.
pub mod accumulator;
/// Accumulator configuration and protocol constants.
pub mod config;
/// Completion delta payload model.
pub mod delta;
/// Async adapters feeding response bodies into a listener.
pub mod driver;
/// Error types.
pub mod errors;
/// Process-wide tracing setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Ready-made handler sets (channel, console).
pub mod sink;
/// Transport-facing listener contracts.
pub mod source;
/// Incremental SSE frame decoding.
pub mod sse;

pub use accumulator::{SessionState, StreamAccumulator};
pub use config::{AccumulatorConfig, DONE_SENTINEL, ObservabilityConfig, POLICY_VIOLATION_MARKER};
pub use delta::{Choice, CompletionDelta, Delta};
pub use driver::{SessionHandle, drive, drive_response, drive_session};
pub use errors::{BodyReadError, ConfigError, StreamError};
pub use sink::StreamEvent;
pub use source::{BufferedResponse, EventSource, EventSourceListener, ResponseBody};
pub use sse::{EventFrame, SseDecoder};
