//! `multipart/x-mixed-replace` framing, as served by `/stream.mjpeg` and as
//! produced by most network cameras.
//!
//! Each part on the wire looks like:
//!
//! ```text
//! --{boundary}\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: {len}\r\n
//! \r\n
//! {payload}\r\n
//! ```

use bytes::{Bytes, BytesMut};

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Value for the response `Content-Type` header of a multipart stream.
pub fn stream_content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={boundary}")
}

/// Frame one payload as a complete multipart part, trailing CRLF included.
pub fn encode_part(boundary: &str, content_type: &str, payload: &[u8]) -> Bytes {
    let head = format!(
        "--{boundary}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\r\n",
        len = payload.len()
    );
    let mut buf = BytesMut::with_capacity(head.len() + payload.len() + 2);
    buf.extend_from_slice(head.as_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(b"\r\n");
    buf.freeze()
}

/// Parse state for an incoming multipart byte stream.
#[derive(Debug, Clone, Copy)]
enum ParseState {
    /// Looking for the boundary marker `--{boundary}\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Part declared a Content-Length; waiting for that many bytes.
    CollectingSized(usize),
    /// No Content-Length; collecting until the next boundary. `scan_from`
    /// avoids re-scanning bytes already searched.
    CollectingDelimited { scan_from: usize },
}

/// Incremental reader that turns arbitrary network chunks into part payloads.
pub struct MultipartReader {
    marker: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
}

impl MultipartReader {
    pub fn new(boundary: &str) -> Self {
        Self {
            marker: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete payload, or `None` if more bytes are needed.
    pub fn next_part(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.marker) {
                        let _ = self.buffer.split_to(pos + self.marker.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the boundary spans chunks
                        if self.buffer.len() > self.marker.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - self.marker.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    // Empty header block: the marker already consumed the first CRLF
                    if self.buffer.starts_with(b"\r\n") {
                        let _ = self.buffer.split_to(2);
                        self.state = ParseState::CollectingDelimited { scan_from: 0 };
                        continue;
                    }
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let headers = self.buffer.split_to(pos + HEADER_END.len());
                    self.state = match content_length(&headers[..pos]) {
                        Some(len) => ParseState::CollectingSized(len),
                        None => ParseState::CollectingDelimited { scan_from: 0 },
                    };
                }
                ParseState::CollectingSized(len) => {
                    if self.buffer.len() < len {
                        return None;
                    }
                    let part = self.buffer.split_to(len).freeze();
                    self.state = ParseState::SeekingBoundary;
                    return Some(part);
                }
                ParseState::CollectingDelimited { scan_from } => {
                    let Some(pos) = find_subsequence(&self.buffer[scan_from..], &self.marker)
                    else {
                        self.state = ParseState::CollectingDelimited {
                            scan_from: self.buffer.len().saturating_sub(self.marker.len()),
                        };
                        return None;
                    };
                    let marker_at = scan_from + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..marker_at].ends_with(b"\r\n") {
                        marker_at - 2
                    } else {
                        marker_at
                    };
                    let part = self.buffer.split_to(end).freeze();
                    let _ = self.buffer.split_to(marker_at - end + self.marker.len());
                    self.state = ParseState::SeekingHeaderEnd;
                    if !part.is_empty() {
                        return Some(part);
                    }
                }
            }
        }
    }
}

fn content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    text.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_part_layout() {
        let part = encode_part("frame", "image/jpeg", b"abc");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n"
        );
        assert_eq!(
            stream_content_type("frame"),
            "multipart/x-mixed-replace; boundary=frame"
        );
    }

    #[test]
    fn reads_sized_parts_split_across_chunks() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_part("frame", "image/jpeg", b"first-payload"));
        wire.extend_from_slice(&encode_part("frame", "image/jpeg", b"second"));

        let mut reader = MultipartReader::new("frame");
        let mut parts = Vec::new();
        for chunk in wire.chunks(5) {
            reader.push(chunk);
            while let Some(part) = reader.next_part() {
                parts.push(part);
            }
        }
        assert_eq!(parts, vec![Bytes::from_static(b"first-payload"), Bytes::from_static(b"second")]);
    }

    #[test]
    fn reads_delimited_parts_without_content_length() {
        let wire = b"preamble--frame\r\nContent-Type: image/jpeg\r\n\r\nAAAA\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\nBB\r\n--frame\r\n";
        let mut reader = MultipartReader::new("frame");
        reader.push(wire);
        assert_eq!(reader.next_part().unwrap(), Bytes::from_static(b"AAAA"));
        assert_eq!(reader.next_part().unwrap(), Bytes::from_static(b"BB"));
        assert!(reader.next_part().is_none());
    }

    #[test]
    fn delimited_part_waits_for_next_boundary() {
        let mut reader = MultipartReader::new("frame");
        reader.push(b"--frame\r\n\r\npartial");
        assert!(reader.next_part().is_none());
        reader.push(b"-rest\r\n--fr");
        assert!(reader.next_part().is_none());
        reader.push(b"ame\r\n");
        assert_eq!(reader.next_part().unwrap(), Bytes::from_static(b"partial-rest"));
    }

    #[test]
    fn content_length_header_is_case_insensitive() {
        assert_eq!(content_length(b"content-length: 42"), Some(42));
        assert_eq!(content_length(b"Content-Type: image/jpeg\r\nCONTENT-LENGTH:7"), Some(7));
        assert_eq!(content_length(b"Content-Type: image/jpeg"), None);
    }
}
