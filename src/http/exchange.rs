//! The handler's view of one request.
//!
//! [`Exchange`] and the request lifecycle share a [`Channel`]: the lifecycle
//! fills in body bytes and drains the outbox, the exchange queues response
//! bytes and records why it is about to suspend. Both live on the loop
//! thread, so the channel is a plain `Rc<RefCell<_>>`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::http::mime::mime_for_ext;
use crate::http::request::{HeaderMap, Method, RequestHead};
use crate::http::response::{Response, StatusCode};
use crate::http::task::{HandlerError, HandlerRef, SuspendReason};
use crate::http::writer::{LAST_CHUNK, encode_chunk, serialize_head, serialize_response};
use crate::routing::Capture;
use crate::server::ConnId;

/// Routing result bound to a request. Set once, never changed.
pub struct RouteBinding {
    pub handler: HandlerRef,
    pub id: String,
    pub captures: Vec<Capture>,
    pub scope: String,
    pub format: String,
}

/// Auxiliary descriptor registration requested by a handler.
///
/// A watch carries its own duplicate of the descriptor, so the registration
/// outlives the handler's copy and is closed with the request record.
#[derive(Debug)]
pub enum WatchOp {
    Watch { fd: RawFd, owned: OwnedFd },
    Unwatch(RawFd),
}

#[derive(Debug)]
pub struct ResponseState {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub extra_lines: Vec<String>,
    pub headers_sent: bool,
    pub chunked: bool,
    pub finished: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: HeaderMap::new(),
            extra_lines: Vec::new(),
            headers_sent: false,
            chunked: false,
            finished: false,
        }
    }
}

/// State shared between a request record and its task.
#[derive(Debug, Default)]
pub struct Channel {
    pub body: BytesMut,
    pub message_complete: bool,
    pub outbox: BytesMut,
    pub suspend: Option<SuspendReason>,
    pub watched: HashSet<RawFd>,
    pub watch_ops: Vec<WatchOp>,
    /// Set when the task was resumed through its waker.
    pub woken: bool,
    pub response: ResponseState,
    /// Format the default Content-Type is derived from.
    pub format: String,
}

impl Channel {
    /// Queues the status line and headers.
    pub fn send_header(&mut self) -> Result<(), HandlerError> {
        if self.response.headers_sent {
            return Err(HandlerError::HeadersSent);
        }
        let content_type = mime_for_ext(&self.format).unwrap_or("text/html");
        let res = &mut self.response;
        res.headers.insert_default("Content-Type", content_type);
        res.headers.insert_default("Connection", "close");
        if res.chunked {
            res.headers.insert("Transfer-Encoding", "chunked");
            res.headers.remove("Content-Length");
        }
        let head = serialize_head(res.status, &res.headers, &res.extra_lines);
        res.headers_sent = true;
        self.outbox.extend_from_slice(&head);
        Ok(())
    }

    /// Writes a complete response in place of whatever the handler would
    /// have sent. Only valid before headers went out.
    pub fn send_response(&mut self, resp: &Response) -> Result<(), HandlerError> {
        if self.response.headers_sent {
            return Err(HandlerError::HeadersSent);
        }
        self.response.headers_sent = true;
        self.response.finished = true;
        self.outbox.extend_from_slice(&serialize_response(resp));
        Ok(())
    }

    /// Completes the response: sends an empty head if nothing was written and
    /// terminates a chunked body. Idempotent.
    pub fn finish(&mut self) {
        if self.response.finished {
            return;
        }
        if !self.response.headers_sent {
            self.response.headers.insert_default("Content-Length", "0");
            // Cannot fail: headers were not sent.
            let _ = self.send_header();
        } else if self.response.chunked {
            self.outbox.extend_from_slice(LAST_CHUNK);
        }
        self.response.finished = true;
    }

    pub fn take_watch_ops(&mut self) -> Vec<WatchOp> {
        std::mem::take(&mut self.watch_ops)
    }
}

/// A handler's handle on its request and response.
pub struct Exchange {
    id: ConnId,
    head: Rc<RequestHead>,
    route: Rc<RouteBinding>,
    channel: Rc<RefCell<Channel>>,
    waker: Waker,
}

impl Exchange {
    pub(crate) fn new(
        id: ConnId,
        head: Rc<RequestHead>,
        route: Rc<RouteBinding>,
        channel: Rc<RefCell<Channel>>,
        waker: Waker,
    ) -> Self {
        Self {
            id,
            head,
            route,
            channel,
            waker,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn method(&self) -> Method {
        self.head.method
    }

    pub fn path(&self) -> &str {
        &self.head.path
    }

    pub fn query(&self) -> Option<&str> {
        self.head.query.as_deref()
    }

    pub fn params(&self) -> Vec<(String, String)> {
        self.head.params()
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.head.param(key)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.head.header(key)
    }

    pub fn route_id(&self) -> &str {
        &self.route.id
    }

    pub fn captures(&self) -> &[Capture] {
        &self.route.captures
    }

    pub fn capture(&self, i: usize) -> Option<&Capture> {
        self.route.captures.get(i)
    }

    pub fn scope(&self) -> &str {
        &self.route.scope
    }

    /// Negotiated response format, e.g. `json` or `html`.
    pub fn format(&self) -> &str {
        &self.route.format
    }

    /// A `Send` waker that resumes this request from any thread.
    pub fn waker(&self) -> Waker {
        self.waker.clone()
    }

    /// The full request body. Suspends until the message is complete.
    pub async fn body(&self) -> Bytes {
        BodyReady {
            channel: &self.channel,
        }
        .await;
        Bytes::copy_from_slice(&self.channel.borrow().body)
    }

    pub fn status(&self, status: StatusCode) -> Result<(), HandlerError> {
        let mut ch = self.channel.borrow_mut();
        if ch.response.headers_sent {
            return Err(HandlerError::HeadersSent);
        }
        ch.response.status = status;
        Ok(())
    }

    pub fn set_header(&self, name: &str, value: impl Into<String>) -> Result<(), HandlerError> {
        let mut ch = self.channel.borrow_mut();
        if ch.response.headers_sent {
            return Err(HandlerError::HeadersSent);
        }
        ch.response.headers.insert(name, value);
        Ok(())
    }

    /// Adds a raw header line, sent verbatim after the regular headers.
    pub fn add_header_line(&self, line: impl Into<String>) -> Result<(), HandlerError> {
        let mut ch = self.channel.borrow_mut();
        if ch.response.headers_sent {
            return Err(HandlerError::HeadersSent);
        }
        ch.response.extra_lines.push(line.into());
        Ok(())
    }

    pub fn content_type(&self, mime: &str) -> Result<(), HandlerError> {
        self.set_header("Content-Type", mime)
    }

    pub fn headers_sent(&self) -> bool {
        self.channel.borrow().response.headers_sent
    }

    pub async fn send_header(&self) -> Result<(), HandlerError> {
        self.channel.borrow_mut().send_header()?;
        self.flushed().await;
        Ok(())
    }

    /// Sends raw body bytes, sending the head first if needed.
    pub async fn send_data(&self, data: &[u8]) -> Result<(), HandlerError> {
        {
            let mut ch = self.channel.borrow_mut();
            if !ch.response.headers_sent {
                ch.send_header()?;
            }
            if ch.response.chunked {
                encode_chunk(data, &mut ch.outbox);
            } else {
                ch.outbox.extend_from_slice(data);
            }
        }
        self.flushed().await;
        Ok(())
    }

    /// Sends one chunk of a chunked body. The first call switches the
    /// response to chunked transfer encoding and sends the head.
    pub async fn send_chunk(&self, data: &[u8]) -> Result<(), HandlerError> {
        {
            let mut ch = self.channel.borrow_mut();
            if !ch.response.headers_sent {
                ch.response.chunked = true;
                ch.send_header()?;
            } else if !ch.response.chunked {
                return Err(HandlerError::HeadersSent);
            }
            encode_chunk(data, &mut ch.outbox);
        }
        self.flushed().await;
        Ok(())
    }

    /// Sends a complete body with its Content-Length.
    pub async fn respond(&self, body: impl AsRef<[u8]>) -> Result<(), HandlerError> {
        let body = body.as_ref();
        {
            let mut ch = self.channel.borrow_mut();
            ch.response.headers.insert("Content-Length", body.len().to_string());
            ch.send_header()?;
            ch.outbox.extend_from_slice(body);
            ch.response.finished = true;
        }
        self.flushed().await;
        Ok(())
    }

    /// Parks the task for at least `duration`.
    pub async fn sleep(&self, duration: Duration) {
        Sleep {
            channel: &self.channel,
            deadline: Instant::now() + duration,
        }
        .await
    }

    /// Parks the task until [`Exchange::waker`] is woken.
    pub async fn park(&self) {
        Park {
            channel: &self.channel,
            parked: false,
        }
        .await
    }

    /// Reads from a non-blocking auxiliary descriptor, suspending until it
    /// is readable. A descriptor not already watched is watched for the
    /// duration of the read only.
    pub async fn read_from<R>(&self, src: &mut R, buf: &mut [u8]) -> Result<usize, HandlerError>
    where
        R: Read + AsFd,
    {
        let fd = src.as_fd().as_raw_fd();
        let _guard = if self.channel.borrow().watched.contains(&fd) {
            None
        } else {
            self.watch(&*src)?;
            Some(WatchGuard {
                channel: &self.channel,
                fd,
            })
        };
        ReadFrom {
            channel: &self.channel,
            src,
            buf,
        }
        .await
    }

    /// Asks the reactor to resume this task when `src` becomes readable,
    /// until [`Exchange::unwatch`] or the end of the request.
    pub fn watch<S: AsFd + ?Sized>(&self, src: &S) -> Result<(), HandlerError> {
        let fd = src.as_fd();
        let raw = fd.as_raw_fd();
        if self.channel.borrow().watched.contains(&raw) {
            return Ok(());
        }
        let owned = fd.try_clone_to_owned()?;
        let mut ch = self.channel.borrow_mut();
        ch.watched.insert(raw);
        ch.watch_ops.push(WatchOp::Watch { fd: raw, owned });
        Ok(())
    }

    pub fn unwatch<S: AsFd + ?Sized>(&self, src: &S) {
        release(&self.channel, src.as_fd().as_raw_fd());
    }

    /// Finishes the response and closes the connection. Never returns.
    pub async fn term_close(&self) {
        TermClose {
            channel: &self.channel,
        }
        .await
    }

    fn flushed(&self) -> Flushed<'_> {
        Flushed {
            channel: &self.channel,
        }
    }
}

fn suspend(channel: &RefCell<Channel>, reason: SuspendReason) {
    channel.borrow_mut().suspend = Some(reason);
}

fn release(channel: &RefCell<Channel>, fd: RawFd) {
    let mut ch = channel.borrow_mut();
    if ch.watched.remove(&fd) {
        ch.watch_ops.push(WatchOp::Unwatch(fd));
    }
}

/// Drops the watch [`Exchange::read_from`] added, however the read ends.
struct WatchGuard<'a> {
    channel: &'a RefCell<Channel>,
    fd: RawFd,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut ch) = self.channel.try_borrow_mut() {
            if ch.watched.remove(&self.fd) {
                ch.watch_ops.push(WatchOp::Unwatch(self.fd));
            }
        }
    }
}

struct Flushed<'a> {
    channel: &'a RefCell<Channel>,
}

impl Future for Flushed<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.channel.borrow().outbox.is_empty() {
            return Poll::Ready(());
        }
        suspend(self.channel, SuspendReason::Writing);
        Poll::Pending
    }
}

struct BodyReady<'a> {
    channel: &'a RefCell<Channel>,
}

impl Future for BodyReady<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.channel.borrow().message_complete {
            return Poll::Ready(());
        }
        suspend(self.channel, SuspendReason::Reading);
        Poll::Pending
    }
}

struct Sleep<'a> {
    channel: &'a RefCell<Channel>,
    deadline: Instant,
}

impl Future for Sleep<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            return Poll::Ready(());
        }
        suspend(
            self.channel,
            SuspendReason::Sleeping {
                until: Some(self.deadline),
            },
        );
        Poll::Pending
    }
}

struct Park<'a> {
    channel: &'a RefCell<Channel>,
    parked: bool,
}

impl Future for Park<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let channel = self.channel;
        let mut ch = channel.borrow_mut();
        if !self.parked {
            self.parked = true;
            ch.woken = false;
        } else if ch.woken {
            ch.woken = false;
            return Poll::Ready(());
        }
        ch.suspend = Some(SuspendReason::Sleeping { until: None });
        Poll::Pending
    }
}

struct ReadFrom<'a, R> {
    channel: &'a RefCell<Channel>,
    src: &'a mut R,
    buf: &'a mut [u8],
}

impl<R: Read> Future for ReadFrom<'_, R> {
    type Output = Result<usize, HandlerError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match this.src.read(this.buf) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    suspend(this.channel, SuspendReason::Reading);
                    return Poll::Pending;
                }
                Err(e) => return Poll::Ready(Err(e.into())),
            }
        }
    }
}

struct TermClose<'a> {
    channel: &'a RefCell<Channel>,
}

impl Future for TermClose<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        suspend(self.channel, SuspendReason::TermClose);
        Poll::Pending
    }
}
