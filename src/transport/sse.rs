//! Server-sent-event decoding (bytes -> JSON payloads).
//!
//! Frames are separated by a blank line; each `data:` line of a frame contributes
//! to its payload. Comment lines (`:`) and a `[DONE]` sentinel are skipped.

use crate::{BoxStream, Error, ErrorContext, Result};
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::io::BufRead;

const DONE_SIGNAL: &str = "[DONE]";

/// Parse one complete frame. `None` means the frame carries no payload.
pub(crate) fn parse_frame(frame: &str) -> Option<Result<Value>> {
    let mut data: Vec<&str> = Vec::new();
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if !line.contains(':') {
            // Bare JSON line without a field name
            data.push(line);
        }
    }

    let payload = data.join("\n");
    let payload = payload.trim();
    if payload.is_empty() || payload == DONE_SIGNAL {
        return None;
    }

    Some(serde_json::from_str(payload).map_err(|e| {
        Error::malformed_with_context(
            "stream frame is not valid JSON",
            ErrorContext::new()
                .with_details(e.to_string())
                .with_source("sse_decoder"),
        )
    }))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split the next complete frame off the front of `buf`.
///
/// Works on raw bytes: a multi-byte character may straddle two network chunks,
/// so text is only decoded once a whole frame is available.
fn take_frame(buf: &mut Vec<u8>) -> Option<String> {
    let lf = find(buf, b"\n\n").map(|idx| (idx, 2));
    let crlf = find(buf, b"\r\n\r\n").map(|idx| (idx, 4));
    let (idx, delim_len) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let frame = String::from_utf8_lossy(&buf[..idx]).into_owned();
    buf.drain(..idx + delim_len);
    Some(frame)
}

/// Decode an async byte stream into JSON payloads.
pub(crate) fn decode_stream(input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
    // Incrementally buffer bytes and emit full frames split by the blank-line delimiter.
    let stream = stream::unfold(
        (input, Vec::<u8>::new(), false),
        |(mut input, mut buf, mut eof)| async move {
            loop {
                if let Some(frame) = take_frame(&mut buf) {
                    match parse_frame(&frame) {
                        Some(item) => return Some((item, (input, buf, eof))),
                        None => continue,
                    }
                }

                if eof {
                    // Trailing frame without a final delimiter
                    let rest = std::mem::take(&mut buf);
                    let rest = String::from_utf8_lossy(&rest);
                    return parse_frame(&rest).map(|item| (item, (input, buf, eof)));
                }

                match input.next().await {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                    None => eof = true,
                }
            }
        },
    );

    Box::pin(stream)
}

/// Blocking frame reader over any buffered source.
pub(crate) struct SseFrames<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> SseFrames<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SseFrames<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut frame = String::new();
        while !self.done {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    if line.trim_end_matches(['\r', '\n']).is_empty() {
                        if let Some(item) = parse_frame(&frame) {
                            return Some(item);
                        }
                        frame.clear();
                    } else {
                        frame.push_str(&line);
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::runtime_with_context(
                        "failed reading event stream",
                        ErrorContext::new()
                            .with_details(e.to_string())
                            .with_source("sse_decoder"),
                    )));
                }
            }
        }
        parse_frame(&frame)
    }
}
