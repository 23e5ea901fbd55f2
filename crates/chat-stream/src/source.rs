use crate::errors::{BodyReadError, StreamError};
use crate::sse::EventFrame;

/// Live transport session that a listener may cancel.
pub trait EventSource {
    /// Requests the transport to stop delivering notifications and release
    /// the connection. Calling it more than once is harmless.
    fn cancel(&self);
}

/// Failure response whose body can be read synchronously.
///
/// Transport adapters buffer the body before notifying the listener so the
/// listener never performs I/O.
pub trait ResponseBody {
    /// HTTP status of the response, when known.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Returns the body as text.
    fn text(&mut self) -> Result<String, BodyReadError>;
}

/// Lifecycle notifications delivered by the transport, one at a time.
pub trait EventSourceListener {
    /// Connection confirmed by the transport.
    fn on_open(&mut self, _source: &dyn EventSource) {}

    /// One decoded SSE frame.
    fn on_event(&mut self, source: &dyn EventSource, frame: &EventFrame);

    /// Transport reached end of stream without failing.
    fn on_closed(&mut self, _source: &dyn EventSource) {}

    /// Transport failed; `response` is present when the server answered.
    fn on_failure(
        &mut self,
        source: &dyn EventSource,
        cause: StreamError,
        response: Option<&mut dyn ResponseBody>,
    );
}

/// Response body already read into memory (or whose read already failed).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferedResponse {
    status: Option<u16>,
    body: Result<String, BodyReadError>,
}

impl BufferedResponse {
    /// Creates a response from a body read result.
    pub fn new(status: Option<u16>, body: Result<String, BodyReadError>) -> Self {
        Self { status, body }
    }

    /// Creates a response with a readable text body and no status.
    pub fn text_body(body: impl Into<String>) -> Self {
        Self::new(None, Ok(body.into()))
    }
}

impl ResponseBody for BufferedResponse {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn text(&mut self) -> Result<String, BodyReadError> {
        self.body.clone()
    }
}
