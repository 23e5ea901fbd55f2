use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, error, info, warn};

use crate::config::AccumulatorConfig;
use crate::delta::CompletionDelta;
use crate::errors::{ConfigError, StreamError};
use crate::source::{BufferedResponse, EventSource, EventSourceListener, ResponseBody};
use crate::sse::EventFrame;

type FragmentFn = Box<dyn FnMut(&str) + Send>;
type CompleteFn = Box<dyn FnMut(&str) + Send>;
type ErrorFn = Box<dyn FnMut(&StreamError, &str) + Send>;

/// Lifecycle of one streamed completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Frames are still being accepted.
    Live,
    /// The sentinel frame was received and the completion callback ran.
    Completed,
    /// A failure was reported through the error callback.
    Failed,
}

impl SessionState {
    /// Returns `true` once the session completed or failed.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Live)
    }
}

/// Accumulates streamed completion deltas into a transcript and notifies the
/// caller of fragments, completion and failure.
///
/// The accumulator reaches a terminal state at most once. Anything delivered
/// after that is ignored.
pub struct StreamAccumulator {
    session_id: uuid::Uuid,
    config: AccumulatorConfig,
    transcript: String,
    state: SessionState,
    on_fragment: FragmentFn,
    on_complete: CompleteFn,
    on_error: ErrorFn,
}

impl StreamAccumulator {
    /// Creates an accumulator with the two required handlers.
    ///
    /// The completion handler defaults to a no-op; see [`Self::on_complete`].
    pub fn new(
        on_fragment: impl FnMut(&str) + Send + 'static,
        on_error: impl FnMut(&StreamError, &str) + Send + 'static,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4(),
            config: AccumulatorConfig::default(),
            transcript: String::new(),
            state: SessionState::Live,
            on_fragment: Box::new(on_fragment),
            on_complete: Box::new(|_| {}),
            on_error: Box::new(on_error),
        }
    }

    /// Sets the handler invoked once with the full transcript on completion.
    pub fn on_complete(mut self, on_complete: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_complete = Box::new(on_complete);
        self
    }

    /// Replaces the default configuration after validating it.
    pub fn with_config(mut self, config: AccumulatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Identifier used in log records for this session.
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Text accumulated so far.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Consumes the accumulator and returns the transcript.
    pub fn into_transcript(self) -> String {
        self.transcript
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns `true` once the session completed or failed.
    ///
    /// A transport that closes without sending the sentinel leaves the
    /// session live; owners can check this after the stream ends.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn handle_frame(&mut self, source: &dyn EventSource, frame: &EventFrame) {
        if frame.data == self.config.done_sentinel {
            self.complete();
            return;
        }
        if frame.data.trim().is_empty() {
            return;
        }

        let delta = match CompletionDelta::from_json(&frame.data) {
            Ok(delta) => delta,
            Err(err) => {
                let mut raw = BufferedResponse::text_body(frame.data.clone());
                self.fail(source, StreamError::from(err), Some(&mut raw));
                return;
            }
        };

        let Some(text) = delta.first_content() else {
            return;
        };
        self.transcript.push_str(text);
        (self.on_fragment)(text);
    }

    fn complete(&mut self) {
        self.state = SessionState::Completed;
        if self.config.log_transcript {
            info!(session_id = %self.session_id, len = self.transcript.len(), transcript = %self.transcript, "chat stream completed");
        } else {
            info!(session_id = %self.session_id, len = self.transcript.len(), "chat stream completed");
        }
        (self.on_complete)(&self.transcript);
    }

    fn fail(
        &mut self,
        source: &dyn EventSource,
        cause: StreamError,
        response: Option<&mut dyn ResponseBody>,
    ) {
        let _cancel = CancelOnDrop(source);
        if self.state.is_terminal() {
            debug!(session_id = %self.session_id, error = %cause, "ignoring failure after terminal state");
            return;
        }
        self.state = SessionState::Failed;

        error!(session_id = %self.session_id, error = %cause, "chat stream failed");
        let body = match response {
            Some(response) => {
                let status = response.status();
                response.text().unwrap_or_else(|err| {
                    warn!(session_id = %self.session_id, ?status, error = %err, "could not read failure body");
                    String::new()
                })
            }
            None => String::new(),
        };
        error!(session_id = %self.session_id, body = %body, "failure response body");
        if body.contains(&self.config.policy_violation_marker) {
            error!(session_id = %self.session_id, "chat session terminated due to policy violation");
        }

        let on_error = &mut self.on_error;
        if catch_unwind(AssertUnwindSafe(|| on_error(&cause, &body))).is_err() {
            warn!(session_id = %self.session_id, "error handler panicked");
        }
    }
}

impl EventSourceListener for StreamAccumulator {
    fn on_open(&mut self, _source: &dyn EventSource) {
        debug!(session_id = %self.session_id, "chat stream opened");
    }

    fn on_event(&mut self, source: &dyn EventSource, frame: &EventFrame) {
        if self.state.is_terminal() {
            debug!(session_id = %self.session_id, state = ?self.state, "ignoring frame after terminal state");
            return;
        }
        self.handle_frame(source, frame);
    }

    fn on_closed(&mut self, _source: &dyn EventSource) {
        if self.state.is_terminal() {
            debug!(session_id = %self.session_id, "chat stream closed");
        } else {
            warn!(session_id = %self.session_id, len = self.transcript.len(), "chat stream closed before completion sentinel");
        }
    }

    fn on_failure(
        &mut self,
        source: &dyn EventSource,
        cause: StreamError,
        response: Option<&mut dyn ResponseBody>,
    ) {
        self.fail(source, cause, response);
    }
}

/// Cancels the wrapped source when dropped, on every exit path.
struct CancelOnDrop<'a>(&'a dyn EventSource);

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::POLICY_VIOLATION_MARKER;
    use crate::errors::BodyReadError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn captured_logs(run: impl FnOnce()) -> String {
        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, run);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).expect("utf8 logs")
    }

    fn fail_with_body(config: AccumulatorConfig, body: &str) -> String {
        let body = body.to_string();
        captured_logs(move || {
            let source = FakeSource::default();
            let mut acc = StreamAccumulator::new(|_| {}, |_, _| {})
                .with_config(config)
                .expect("valid config");
            let mut response = BufferedResponse::new(Some(403), Ok(body));
            acc.on_failure(&source, StreamError::status(403, "Forbidden"), Some(&mut response));
        })
    }

    const POLICY_NOTICE: &str = "terminated due to policy violation";

    #[derive(Default)]
    struct FakeSource {
        cancels: AtomicUsize,
    }

    impl EventSource for FakeSource {
        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct Recorded {
        fragments: Arc<Mutex<Vec<String>>>,
        completions: Arc<Mutex<Vec<String>>>,
        errors: Arc<Mutex<Vec<(StreamError, String)>>>,
    }

    fn recording_accumulator() -> (StreamAccumulator, Recorded) {
        let recorded = Recorded::default();
        let fragments = recorded.fragments.clone();
        let errors = recorded.errors.clone();
        let completions = recorded.completions.clone();
        let acc = StreamAccumulator::new(
            move |text| fragments.lock().unwrap().push(text.to_string()),
            move |err, body| errors.lock().unwrap().push((err.clone(), body.to_string())),
        )
        .on_complete(move |transcript| completions.lock().unwrap().push(transcript.to_string()));
        (acc, recorded)
    }

    fn content_frame(text: &str) -> EventFrame {
        EventFrame::data(
            serde_json::json!({"choices":[{"index":0,"delta":{"content":text}}]}).to_string(),
        )
    }

    #[test]
    fn fragments_then_sentinel_complete_with_concatenation() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_open(&source);
        acc.on_event(&source, &content_frame("Hel"));
        acc.on_event(&source, &content_frame("lo"));
        acc.on_event(&source, &EventFrame::data("[DONE]"));
        acc.on_closed(&source);

        assert_eq!(*recorded.fragments.lock().unwrap(), vec!["Hel", "lo"]);
        assert_eq!(*recorded.completions.lock().unwrap(), vec!["Hello"]);
        assert!(recorded.errors.lock().unwrap().is_empty());
        assert_eq!(acc.state(), SessionState::Completed);
        assert_eq!(source.cancels.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_or_missing_choices_fire_nothing() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_event(&source, &content_frame("a"));
        acc.on_event(&source, &EventFrame::data(r#"{"choices":[]}"#));
        acc.on_event(&source, &EventFrame::data(r#"{"id":"x"}"#));

        assert_eq!(*recorded.fragments.lock().unwrap(), vec!["a"]);
        assert_eq!(acc.transcript(), "a");
        assert!(!acc.is_terminal());
    }

    #[test]
    fn role_only_delta_fires_nothing() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_event(
            &source,
            &EventFrame::data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
        );

        assert!(recorded.fragments.lock().unwrap().is_empty());
        assert_eq!(acc.transcript(), "");
    }

    #[test]
    fn empty_string_content_is_appended_and_forwarded() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_event(&source, &content_frame(""));

        assert_eq!(*recorded.fragments.lock().unwrap(), vec![""]);
    }

    #[test]
    fn completion_fires_once_and_later_frames_are_ignored() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_event(&source, &content_frame("x"));
        acc.on_event(&source, &EventFrame::data("[DONE]"));
        acc.on_event(&source, &content_frame("y"));
        acc.on_event(&source, &EventFrame::data("[DONE]"));

        assert_eq!(*recorded.fragments.lock().unwrap(), vec!["x"]);
        assert_eq!(*recorded.completions.lock().unwrap(), vec!["x"]);
        assert_eq!(acc.transcript(), "x");
    }

    #[test]
    fn close_without_sentinel_does_not_complete() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_event(&source, &content_frame("partial"));
        acc.on_closed(&source);

        assert!(recorded.completions.lock().unwrap().is_empty());
        assert!(recorded.errors.lock().unwrap().is_empty());
        assert!(!acc.is_terminal());
        assert_eq!(acc.into_transcript(), "partial");
    }

    #[test]
    fn failure_with_body_passes_body_verbatim_and_cancels_once() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();
        let mut response = BufferedResponse::new(Some(500), Ok("upstream exploded".into()));

        acc.on_failure(&source, StreamError::transport("reset"), Some(&mut response));

        let errors = recorded.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, StreamError::transport("reset"));
        assert_eq!(errors[0].1, "upstream exploded");
        assert_eq!(source.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(acc.state(), SessionState::Failed);
    }

    #[test]
    fn failure_without_response_passes_empty_body() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_failure(&source, StreamError::transport("timeout"), None);

        assert_eq!(recorded.errors.lock().unwrap()[0].1, "");
        assert_eq!(source.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unreadable_body_is_treated_as_empty() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();
        let mut response = BufferedResponse::new(Some(502), Err(BodyReadError("eof".into())));

        acc.on_failure(&source, StreamError::status(502, "Bad Gateway"), Some(&mut response));

        assert_eq!(recorded.errors.lock().unwrap()[0].1, "");
        assert_eq!(source.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_violation_body_still_reaches_error_handler() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();
        let body = format!(r#"{{"error":{{"message":"{POLICY_VIOLATION_MARKER}"}}}}"#);
        let mut response = BufferedResponse::new(Some(403), Ok(body.clone()));

        acc.on_failure(&source, StreamError::status(403, "Forbidden"), Some(&mut response));

        assert_eq!(recorded.errors.lock().unwrap()[0].1, body);
        assert_eq!(source.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_error_handler_still_cancels() {
        let source = FakeSource::default();
        let mut acc = StreamAccumulator::new(|_| {}, |_, _| panic!("handler bug"));

        acc.on_failure(&source, StreamError::transport("reset"), None);

        assert_eq!(source.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(acc.state(), SessionState::Failed);
    }

    #[test]
    fn malformed_payload_is_reported_with_raw_data() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_event(&source, &content_frame("ok"));
        acc.on_event(&source, &EventFrame::data("{not json"));
        acc.on_event(&source, &content_frame("late"));

        let errors = recorded.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].0, StreamError::Decode { .. }));
        assert_eq!(errors[0].1, "{not json");
        assert_eq!(acc.transcript(), "ok");
        assert_eq!(source.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_after_completion_only_cancels() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_event(&source, &EventFrame::data("[DONE]"));
        acc.on_failure(&source, StreamError::transport("late reset"), None);

        assert!(recorded.errors.lock().unwrap().is_empty());
        assert_eq!(acc.state(), SessionState::Completed);
        assert_eq!(source.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_completion_handler_is_noop() {
        let source = FakeSource::default();
        let mut acc = StreamAccumulator::new(|_| {}, |_, _| {});

        acc.on_event(&source, &content_frame("done"));
        acc.on_event(&source, &EventFrame::data("[DONE]"));

        assert_eq!(acc.state(), SessionState::Completed);
    }

    #[test]
    fn custom_sentinel_terminates_stream() {
        let source = FakeSource::default();
        let (acc, recorded) = recording_accumulator();
        let mut acc = acc
            .with_config(
                AccumulatorConfig::default()
                    .done_sentinel("<END>")
                    .log_transcript(false),
            )
            .expect("valid config");

        acc.on_event(&source, &content_frame("hi"));
        acc.on_event(&source, &EventFrame::data("<END>"));

        assert_eq!(*recorded.completions.lock().unwrap(), vec!["hi"]);
    }

    #[test]
    fn with_config_rejects_invalid_config() {
        let result = StreamAccumulator::new(|_| {}, |_, _| {})
            .with_config(AccumulatorConfig::default().done_sentinel(""));
        assert!(matches!(result, Err(ConfigError::Empty { .. })));
    }

    #[test]
    fn informational_fields_with_unexpected_types_still_stream() {
        let source = FakeSource::default();
        let (mut acc, recorded) = recording_accumulator();

        acc.on_event(
            &source,
            &EventFrame::data(r#"{"choices":[{"index":null,"delta":{"content":"Hi"}}]}"#),
        );
        acc.on_event(
            &source,
            &EventFrame::data(r#"{"created":1.7e9,"choices":[{"delta":{"content":"x"}}]}"#),
        );

        assert_eq!(*recorded.fragments.lock().unwrap(), vec!["Hi", "x"]);
        assert!(recorded.errors.lock().unwrap().is_empty());
        assert_eq!(acc.state(), SessionState::Live);
        assert_eq!(source.cancels.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn policy_notice_logged_only_when_body_has_marker() {
        let flagged = fail_with_body(
            AccumulatorConfig::default(),
            &format!("{{\"error\":\"{POLICY_VIOLATION_MARKER}\"}}"),
        );
        assert!(flagged.contains(POLICY_NOTICE), "{flagged}");

        let plain = fail_with_body(AccumulatorConfig::default(), "rate limited");
        assert!(plain.contains("chat stream failed"), "{plain}");
        assert!(!plain.contains(POLICY_NOTICE), "{plain}");
    }

    #[test]
    fn custom_policy_marker_replaces_default() {
        let config = AccumulatorConfig::default().policy_violation_marker("account suspended");

        let flagged = fail_with_body(config.clone(), "your account suspended today");
        assert!(flagged.contains(POLICY_NOTICE), "{flagged}");

        let default_text = fail_with_body(config, POLICY_VIOLATION_MARKER);
        assert!(!default_text.contains(POLICY_NOTICE), "{default_text}");
    }
}
