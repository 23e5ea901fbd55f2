/// A decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventFrame {
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl EventFrame {
    /// Creates an unnamed frame carrying `data`.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
        }
    }
}

/// Incremental decoder turning raw body chunks into `EventFrame`s.
///
/// Chunks may split frames (and lines) at arbitrary byte offsets; incomplete
/// input stays buffered until the next call.
#[derive(Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    // Bytes before this offset hold no delimiter start.
    scanned: usize,
}

impl SseDecoder {
    /// Appends a chunk and returns every frame it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<EventFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, self.scanned) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            self.scanned = 0;
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        // A delimiter may straddle the next chunk by up to three bytes.
        self.scanned = self.buf.len().saturating_sub(3);
        frames
    }

    /// Flushes a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<EventFrame> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<EventFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut id: Option<String> = None;
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }
    // Frames without data (heartbeats, bare ids) are never dispatched.
    if data_lines.is_empty() {
        return None;
    }
    Some(EventFrame {
        id,
        event,
        data: data_lines.join("\n"),
    })
}
