// Server-Sent Events frame decoder
// Buffers raw bytes so multi-byte UTF-8 characters split across chunks decode intact.

/// Incremental SSE decoder. Feed it body chunks, drain complete `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the data payloads of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some((end, delim_len)) = find_event_boundary(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + delim_len).collect();
            let event_str = String::from_utf8_lossy(&raw[..end]);
            if let Some(data) = extract_sse_data(&event_str) {
                events.push(data);
            }
        }
        events
    }

    /// Flush whatever is left when the stream ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        extract_sse_data(&String::from_utf8_lossy(&raw))
    }
}

/// Position of the first blank line, and the delimiter length (`\n\n` or `\r\n\r\n`).
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Extract the joined `data:` payload from one SSE event. Comment-only events yield `None`.
fn extract_sse_data(event_str: &str) -> Option<String> {
    let lines: Vec<&str> = event_str
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.starts_with(':'))
        .filter_map(|line| {
            line.strip_prefix("data: ")
                .or_else(|| line.strip_prefix("data:"))
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    let data = lines.join("\n");
    if data.trim().is_empty() {
        None
    } else {
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_events_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: {\"a\":").is_empty());
        let out = d.push(b"1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_multibyte_char_split_between_chunks() {
        let payload = "data: {\"answer\":\"你好\"}\n\n".as_bytes();
        // cut in the middle of the first CJK character
        let cut = payload.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut d = SseDecoder::new();
        assert!(d.push(&payload[..cut]).is_empty());
        let out = d.push(&payload[cut..]);
        assert_eq!(out, vec!["{\"answer\":\"你好\"}".to_string()]);
    }

    #[test]
    fn test_skips_comments_and_handles_crlf() {
        let mut d = SseDecoder::new();
        let out = d.push(b": keepalive\r\n\r\nevent: x\r\ndata: one\r\n\r\n");
        assert_eq!(out, vec!["one".to_string()]);
    }

    #[test]
    fn test_finish_flushes_tail() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: tail").is_empty());
        assert_eq!(d.finish().as_deref(), Some("tail"));
        assert_eq!(d.finish(), None);
    }
}
