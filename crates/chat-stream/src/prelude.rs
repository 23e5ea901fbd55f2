//! Common imports for typical usage.
pub use crate::{
    AccumulatorConfig, EventFrame, EventSource, EventSourceListener, SessionHandle,
    StreamAccumulator, StreamError, StreamEvent, drive, drive_response,
};
