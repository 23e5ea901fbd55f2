//! Ready-made handler sets for common consumers.

use std::io::Write as _;

use tokio::sync::mpsc;
use tracing::warn;

use crate::accumulator::StreamAccumulator;
use crate::errors::StreamError;

/// Notification forwarded by a channel-backed accumulator.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Incremental text fragment, numbered from zero.
    Fragment { seq: u64, text: String },
    /// Terminal success event with the full transcript.
    Completed { transcript: String },
    /// Terminal failure event with whatever body text could be recovered.
    Failed { error: StreamError, body: String },
}

impl StreamEvent {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Creates an accumulator whose notifications are forwarded to a channel.
///
/// The channel is unbounded so the handlers never block the transport; the
/// receiver may be consumed from another task.
pub fn channel() -> (StreamAccumulator, mpsc::UnboundedReceiver<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let fragment_tx = tx.clone();
    let error_tx = tx.clone();
    let mut seq = 0_u64;

    let accumulator = StreamAccumulator::new(
        move |text| {
            let event = StreamEvent::Fragment {
                seq,
                text: text.to_string(),
            };
            seq = seq.saturating_add(1);
            send(&fragment_tx, event);
        },
        move |error, body| {
            send(
                &error_tx,
                StreamEvent::Failed {
                    error: error.clone(),
                    body: body.to_string(),
                },
            );
        },
    )
    .on_complete(move |transcript| {
        send(
            &tx,
            StreamEvent::Completed {
                transcript: transcript.to_string(),
            },
        );
    });
    (accumulator, rx)
}

/// Creates an accumulator that prints fragments to stdout as they arrive.
pub fn console() -> StreamAccumulator {
    StreamAccumulator::new(
        |text| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        },
        |error, body| {
            if body.is_empty() {
                eprintln!("stream error: {error}");
            } else {
                eprintln!("stream error: {error}: {body}");
            }
        },
    )
    .on_complete(|_| println!())
}

fn send(tx: &mpsc::UnboundedSender<StreamEvent>, event: StreamEvent) {
    if tx.send(event).is_err() {
        warn!("stream event receiver dropped");
    }
}
