use std::io::{self, Write};

use bytes::{Buf, BytesMut};

use crate::http::request::HeaderMap;
use crate::http::response::{Response, StatusCode};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Terminator of a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Status line, headers, raw extra header lines and the blank separator.
pub fn serialize_head(status: StatusCode, headers: &HeaderMap, extra_lines: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in headers.iter() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    for line in extra_lines {
        buf.extend_from_slice(line.trim_end_matches(['\r', '\n']).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = serialize_head(resp.status, &resp.headers, &[]);
    buf.extend_from_slice(&resp.body);
    buf
}

/// Appends one chunk in chunked transfer-encoding framing. Empty data is
/// skipped because a zero-size chunk would end the body.
pub fn encode_chunk(data: &[u8], out: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Writes as much of `outbox` as the sink takes without blocking.
///
/// Returns `Ok(true)` once the outbox is empty, `Ok(false)` when the sink
/// would block with bytes still pending.
pub fn flush<W: Write>(sink: &mut W, outbox: &mut BytesMut) -> io::Result<bool> {
    while !outbox.is_empty() {
        match sink.write(&outbox[..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }
            Ok(n) => outbox.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Throttled {
        taken: Vec<u8>,
        budget: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget).min(3);
            self.budget -= n;
            self.taken.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn flush_stops_on_would_block() {
        let mut sink = Throttled { taken: Vec::new(), budget: 5 };
        let mut outbox = BytesMut::from(&b"hello world"[..]);

        assert!(!flush(&mut sink, &mut outbox).unwrap());
        assert_eq!(sink.taken, b"hello");
        assert_eq!(&outbox[..], b" world");

        sink.budget = 100;
        assert!(flush(&mut sink, &mut outbox).unwrap());
        assert_eq!(sink.taken, b"hello world");
    }

    #[test]
    fn chunk_framing() {
        let mut out = BytesMut::new();
        encode_chunk(b"hello, chunked world", &mut out);
        encode_chunk(b"", &mut out);
        assert_eq!(&out[..], b"14\r\nhello, chunked world\r\n");
    }
}
