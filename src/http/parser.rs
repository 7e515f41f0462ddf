//! Incremental HTTP/1.x request parser.
//!
//! The parser is pushed arbitrary slices of the byte stream and reports
//! structure through a [`ParserSink`]. It never sees application code: the
//! sink only fills in structural fields. An empty slice means end-of-stream.

use bytes::BytesMut;
use thiserror::Error;

use crate::http::request::Method;

/// Largest request head accepted before the terminating blank line.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;
/// Largest number of header lines.
pub const MAX_HEADERS: usize = 64;
/// Default cap on a request body, declared or chunked.
pub const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;
const MAX_LINE: usize = 4096;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed request head: {0}")]
    Invalid(httparse::Error),
    #[error("unsupported method {0:?}")]
    InvalidMethod(String),
    #[error("invalid content-length")]
    InvalidContentLength,
    #[error("malformed chunked body")]
    InvalidChunk,
    #[error("request head exceeds {MAX_HEAD_SIZE} bytes")]
    HeadTooLarge,
    #[error("more than {MAX_HEADERS} headers")]
    TooManyHeaders,
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("connection closed mid-message")]
    UnexpectedEof,
    #[error("parser already failed")]
    Aborted,
}

impl From<httparse::Error> for ParseError {
    fn from(e: httparse::Error) -> Self {
        match e {
            httparse::Error::TooManyHeaders => ParseError::TooManyHeaders,
            other => ParseError::Invalid(other),
        }
    }
}

/// Structural callbacks, invoked in stream order.
pub trait ParserSink {
    fn on_url(&mut self, method: Method, url: &[u8]);
    fn on_header_field(&mut self, name: &[u8]);
    fn on_header_value(&mut self, value: &[u8]);
    fn on_headers_complete(&mut self, version: u8);
    fn on_body(&mut self, chunk: &[u8]);
    fn on_message_complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Head,
    Length(usize),
    ChunkSize,
    ChunkData(usize),
    ChunkDataEnd,
    ChunkTrailer,
    Done,
    Failed,
}

pub struct RequestParser {
    phase: Phase,
    head: BytesMut,
    line: Vec<u8>,
    body_limit: usize,
    body_seen: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            phase: Phase::Head,
            head: BytesMut::with_capacity(1024),
            line: Vec::new(),
            body_limit: MAX_BODY_SIZE,
            body_seen: 0,
        }
    }

    /// Caps the body at `limit` bytes.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn has_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    /// Feeds one chunk of the stream. Once an error is returned the parser is
    /// poisoned and every later call fails with [`ParseError::Aborted`].
    pub fn execute<S: ParserSink>(&mut self, data: &[u8], sink: &mut S) -> Result<(), ParseError> {
        let res = if data.is_empty() {
            self.eof()
        } else {
            match self.phase {
                Phase::Failed => Err(ParseError::Aborted),
                Phase::Done => Ok(()),
                Phase::Head => self.feed_head(data, sink),
                _ => self.feed_body(data, sink),
            }
        };
        if res.is_err() {
            self.phase = Phase::Failed;
        }
        res
    }

    fn eof(&self) -> Result<(), ParseError> {
        match self.phase {
            Phase::Head if self.head.is_empty() => Ok(()),
            Phase::Done => Ok(()),
            Phase::Failed => Err(ParseError::Aborted),
            _ => Err(ParseError::UnexpectedEof),
        }
    }

    fn feed_head<S: ParserSink>(&mut self, data: &[u8], sink: &mut S) -> Result<(), ParseError> {
        self.head.extend_from_slice(data);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let consumed = match req.parse(&self.head)? {
            httparse::Status::Partial => {
                if self.head.len() > MAX_HEAD_SIZE {
                    return Err(ParseError::HeadTooLarge);
                }
                return Ok(());
            }
            httparse::Status::Complete(n) => n,
        };

        let method_str = req.method.unwrap_or("");
        let method = Method::from_str(method_str)
            .ok_or_else(|| ParseError::InvalidMethod(method_str.to_string()))?;
        sink.on_url(method, req.path.unwrap_or("/").as_bytes());

        let mut chunked = false;
        let mut length = None;
        for h in req.headers.iter() {
            sink.on_header_field(h.name.as_bytes());
            sink.on_header_value(h.value);
            if h.name.eq_ignore_ascii_case("Transfer-Encoding") {
                chunked = std::str::from_utf8(h.value)
                    .map(|v| v.to_ascii_lowercase().contains("chunked"))
                    .unwrap_or(false);
            } else if h.name.eq_ignore_ascii_case("Content-Length") {
                let n = std::str::from_utf8(h.value)
                    .ok()
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .ok_or(ParseError::InvalidContentLength)?;
                length = Some(n);
            }
        }
        if length.is_some_and(|n| n > self.body_limit) {
            return Err(ParseError::BodyTooLarge(self.body_limit));
        }
        sink.on_headers_complete(req.version.unwrap_or(1));

        let rest = self.head.split_off(consumed);
        self.head.clear();

        self.phase = if chunked {
            Phase::ChunkSize
        } else {
            match length {
                Some(n) if n > 0 => Phase::Length(n),
                _ => {
                    sink.on_message_complete();
                    Phase::Done
                }
            }
        };

        if rest.is_empty() || self.phase == Phase::Done {
            // Bytes past a complete message belong to a pipelined request,
            // which this server does not serve.
            return Ok(());
        }
        self.feed_body(&rest, sink)
    }

    fn feed_body<S: ParserSink>(&mut self, mut data: &[u8], sink: &mut S) -> Result<(), ParseError> {
        while !data.is_empty() {
            match self.phase {
                Phase::Length(rem) => {
                    let n = rem.min(data.len());
                    sink.on_body(&data[..n]);
                    data = &data[n..];
                    if rem == n {
                        self.complete(sink);
                    } else {
                        self.phase = Phase::Length(rem - n);
                    }
                }
                Phase::ChunkSize => {
                    if let Some(line) = self.take_line(&mut data)? {
                        let size = parse_chunk_size(&line)?;
                        self.body_seen = self.body_seen.saturating_add(size);
                        if self.body_seen > self.body_limit {
                            return Err(ParseError::BodyTooLarge(self.body_limit));
                        }
                        self.phase = if size == 0 {
                            Phase::ChunkTrailer
                        } else {
                            Phase::ChunkData(size)
                        };
                    }
                }
                Phase::ChunkData(rem) => {
                    let n = rem.min(data.len());
                    sink.on_body(&data[..n]);
                    data = &data[n..];
                    self.phase = if rem == n {
                        Phase::ChunkDataEnd
                    } else {
                        Phase::ChunkData(rem - n)
                    };
                }
                Phase::ChunkDataEnd => {
                    if let Some(line) = self.take_line(&mut data)? {
                        if !line.is_empty() {
                            return Err(ParseError::InvalidChunk);
                        }
                        self.phase = Phase::ChunkSize;
                    }
                }
                Phase::ChunkTrailer => {
                    if let Some(line) = self.take_line(&mut data)? {
                        if line.is_empty() {
                            self.complete(sink);
                        }
                    }
                }
                Phase::Done => return Ok(()),
                Phase::Head | Phase::Failed => return Err(ParseError::Aborted),
            }
        }
        Ok(())
    }

    fn complete<S: ParserSink>(&mut self, sink: &mut S) {
        self.phase = Phase::Done;
        sink.on_message_complete();
    }

    /// Accumulates up to the next `\n`. Returns the line without its CRLF.
    fn take_line(&mut self, data: &mut &[u8]) -> Result<Option<Vec<u8>>, ParseError> {
        match data.iter().position(|&b| b == b'\n') {
            Some(i) => {
                self.line.extend_from_slice(&data[..i]);
                *data = &data[i + 1..];
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            None => {
                self.line.extend_from_slice(data);
                *data = &[];
                if self.line.len() > MAX_LINE {
                    return Err(ParseError::InvalidChunk);
                }
                Ok(None)
            }
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    let hex = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(hex, 16).map_err(|_| ParseError::InvalidChunk)
}
