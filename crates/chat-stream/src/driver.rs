//! Feeds an open HTTP response body through an `EventSourceListener`.
//!
//! Connecting, authenticating and building the request are the caller's job;
//! the driver starts from a response (or any byte stream) that is already
//! flowing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt as _};
use tracing::debug;

use crate::errors::{BodyReadError, StreamError};
use crate::source::{BufferedResponse, EventSource, EventSourceListener};
use crate::sse::SseDecoder;

/// Cancellation handle for one driven stream.
///
/// Clones share the same flag, so a caller may keep one to stop the driver
/// between frames.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: uuid::Uuid,
    cancelled: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Creates a live handle with a fresh id.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifier used in log records for this stream.
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Returns `true` once `cancel` has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for SessionHandle {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!(stream_id = %self.id, "stream cancelled");
        }
    }
}

/// Drives `stream` through `listener` with a fresh session handle.
pub async fn drive<S, B, E, L>(stream: S, listener: &mut L) -> SessionHandle
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    L: EventSourceListener + ?Sized,
{
    let session = SessionHandle::new();
    drive_session(session.clone(), stream, listener).await;
    session
}

/// Drives `stream` through `listener` until the body ends, a read fails, or
/// the session is cancelled.
///
/// `on_open` is delivered first. `on_closed` is delivered only when the body
/// ends without failure or cancellation.
pub async fn drive_session<S, B, E, L>(
    session: SessionHandle,
    stream: S,
    listener: &mut L,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    L: EventSourceListener + ?Sized,
{
    futures::pin_mut!(stream);
    let mut decoder = SseDecoder::default();
    let mut frames_seen = 0_u64;

    listener.on_open(&session);
    loop {
        if session.is_cancelled() {
            debug!(stream_id = %session.id(), frames_seen, "stopping cancelled stream");
            return;
        }
        match stream.next().await {
            Some(Ok(chunk)) => {
                for frame in decoder.push_chunk(chunk.as_ref()) {
                    if session.is_cancelled() {
                        break;
                    }
                    frames_seen = frames_seen.saturating_add(1);
                    listener.on_event(&session, &frame);
                }
            }
            Some(Err(e)) => {
                listener.on_failure(
                    &session,
                    StreamError::transport(format!("stream read failed: {e}")),
                    None,
                );
                return;
            }
            None => {
                if let Some(frame) = decoder.finish()
                    && !session.is_cancelled()
                {
                    frames_seen = frames_seen.saturating_add(1);
                    listener.on_event(&session, &frame);
                }
                break;
            }
        }
    }

    if !session.is_cancelled() {
        debug!(stream_id = %session.id(), frames_seen, "stream body ended");
        listener.on_closed(&session);
    }
}

/// Drives a `reqwest` response through `listener`.
///
/// A non-success status is reported through `on_failure` together with the
/// buffered response body; no frames are delivered in that case.
pub async fn drive_response<L>(response: reqwest::Response, listener: &mut L) -> SessionHandle
where
    L: EventSourceListener + ?Sized,
{
    let session = SessionHandle::new();
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .map_err(|e| BodyReadError(e.to_string()));
        let (cause, mut buffered) = status_failure(
            status.as_u16(),
            status.canonical_reason().unwrap_or("request failed"),
            body,
        );
        listener.on_failure(&session, cause, Some(&mut buffered));
        return session;
    }

    drive_session(session.clone(), response.bytes_stream(), listener).await;
    session
}

fn status_failure(
    status: u16,
    reason: &str,
    body: Result<String, BodyReadError>,
) -> (StreamError, BufferedResponse) {
    (
        StreamError::status(status, reason),
        BufferedResponse::new(Some(status), body),
    )
}
