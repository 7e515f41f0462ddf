//! Request records and the request lifecycle.
//!
//! A [`RequestRecord`] is everything the server knows about one connection:
//! the socket, parse progress, the route bound to the request and the task
//! running its handler. [`RequestRecord::service`] advances it by one
//! readiness event and tells the reactor what to wait for next.
//!
//! ```text
//!   INIT ──(headers)──► HEADERS_COMPLETE ──(body)──► MESSAGE_COMPLETE
//!     └────────────── malformed input ──────────────► ERROR (absorbing)
//! ```
//!
//! Pipelining is not supported: bytes arriving after the first message is
//! complete are read and discarded until the record is evicted.

use std::cell::{OnceCell, RefCell};
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Instant;

use bytes::BytesMut;
use tracing::{debug, error, warn};

use crate::http::accept::parse_accept;
use crate::http::exchange::{Channel, Exchange, RouteBinding, WatchOp};
use crate::http::parser::{ParseError, ParserSink, RequestParser};
use crate::http::request::{HeaderMap, Method, RequestHead, override_method, split_target};
use crate::http::response::Response;
use crate::http::task::{ErrorHandler, HandlerError, HandlerRef, RequestLog, SuspendReason, Task};
use crate::http::writer;
use crate::routing::Router;
use crate::server::ConnId;
use crate::server::poller::Interest;
use crate::server::wake::ReactorHandle;

const READ_BUF: usize = 16 * 1024;
/// Resumes per service call before yielding back to the loop.
const RESUME_BUDGET: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseState {
    Init,
    HeadersComplete,
    MessageComplete,
    Error,
}

impl ParseState {
    /// Moves forward only. `Error` is absorbing.
    pub fn advance(&mut self, next: ParseState) -> bool {
        if *self == ParseState::Error || next <= *self {
            return false;
        }
        *self = next;
        true
    }
}

/// What the reactor should do with a record after servicing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stay registered with this interest.
    Wait(Interest),
    /// Deregister and park until the deadline, or an external wakeup.
    Sleep(Option<Instant>),
    /// Close and drop the record.
    Evict,
    /// Nothing happened; the record is parked.
    Idle,
}

/// Collaborators a service call needs from the reactor.
pub struct ServiceEnv<'a> {
    pub router: &'a Router<HandlerRef>,
    pub handle: &'a ReactorHandle,
    pub error_handler: &'a ErrorHandler,
    pub request_log: Option<&'a RequestLog>,
    pub now: Instant,
}

/// Parser callbacks land here; only structural fields are touched.
#[derive(Default)]
struct HeadBuilder {
    method: Option<Method>,
    url: Vec<u8>,
    field: Vec<u8>,
    value: Vec<u8>,
    headers: HeaderMap,
    version: u8,
    body: BytesMut,
    headers_complete: bool,
    message_complete: bool,
}

impl HeadBuilder {
    fn commit_header(&mut self) {
        if self.field.is_empty() {
            return;
        }
        let name = String::from_utf8_lossy(&self.field).into_owned();
        let value = String::from_utf8_lossy(&self.value).trim().to_string();
        match self.headers.get(&name) {
            Some(prev) => {
                let joined = format!("{prev}, {value}");
                self.headers.insert(&name, joined);
            }
            None => self.headers.insert(&name, value),
        }
        self.field.clear();
        self.value.clear();
    }

    fn build_head(&mut self) -> RequestHead {
        let target = String::from_utf8_lossy(&self.url).into_owned();
        let (path, query) = split_target(&target);
        let method = override_method(self.method.unwrap_or(Method::GET), query.as_deref());
        let accept = self
            .headers
            .get("Accept")
            .map(parse_accept)
            .unwrap_or_default();
        RequestHead {
            method,
            path,
            query,
            version: format!("HTTP/1.{}", self.version),
            headers: std::mem::take(&mut self.headers),
            accept,
        }
    }
}

impl ParserSink for HeadBuilder {
    fn on_url(&mut self, method: Method, url: &[u8]) {
        self.method = Some(method);
        self.url.extend_from_slice(url);
    }

    fn on_header_field(&mut self, name: &[u8]) {
        if !self.value.is_empty() {
            self.commit_header();
        }
        self.field.extend_from_slice(name);
    }

    fn on_header_value(&mut self, value: &[u8]) {
        self.value.extend_from_slice(value);
    }

    fn on_headers_complete(&mut self, version: u8) {
        self.commit_header();
        self.version = version;
        self.headers_complete = true;
    }

    fn on_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    fn on_message_complete(&mut self) {
        self.message_complete = true;
    }
}

/// An auxiliary descriptor watched on behalf of a handler.
#[derive(Debug)]
pub struct WatchedFd {
    /// The handler's descriptor number, used to match `unwatch`.
    pub fd: RawFd,
    pub token: u64,
    owned: OwnedFd,
}

impl WatchedFd {
    pub(crate) fn new(fd: RawFd, owned: OwnedFd, token: u64) -> Self {
        Self { fd, token, owned }
    }

    /// The duplicate actually registered with the poller.
    pub fn registered(&self) -> RawFd {
        self.owned.as_raw_fd()
    }
}

/// Per-connection state.
pub struct RequestRecord {
    id: ConnId,
    stream: Option<TcpStream>,
    pub sleeping: bool,
    /// Interest the socket is currently registered with.
    pub interest: Interest,
    /// Auxiliary descriptors registered for this record.
    pub watched: Vec<WatchedFd>,
    /// Bumped on every sleep; timer entries from older sleeps are stale.
    pub sleep_gen: u64,
    pub last_active: Instant,
    state: ParseState,
    parser: RequestParser,
    builder: HeadBuilder,
    head: Option<Rc<RequestHead>>,
    route: OnceCell<Rc<RouteBinding>>,
    task: Option<Task>,
    channel: Rc<RefCell<Channel>>,
    blocked_on_write: bool,
    eof: bool,
    closing: bool,
    closed: bool,
    too_large: bool,
}

impl RequestRecord {
    pub fn new(id: ConnId, stream: TcpStream, now: Instant) -> Self {
        Self {
            id,
            stream: Some(stream),
            sleeping: false,
            interest: Interest::Read,
            watched: Vec::new(),
            sleep_gen: 0,
            last_active: now,
            state: ParseState::Init,
            parser: RequestParser::new(),
            builder: HeadBuilder::default(),
            head: None,
            route: OnceCell::new(),
            task: None,
            channel: Rc::new(RefCell::new(Channel::default())),
            blocked_on_write: false,
            eof: false,
            closing: false,
            closed: false,
            too_large: false,
        }
    }

    /// Caps the request body the parser accepts.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.parser = RequestParser::new().with_body_limit(limit);
        self
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn head(&self) -> Option<&RequestHead> {
        self.head.as_deref()
    }

    pub fn route(&self) -> Option<&RouteBinding> {
        self.route.get().map(|r| &**r)
    }

    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    /// The peer shut down its side of the connection.
    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn mark_eof(&mut self) {
        self.eof = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn take_watch_ops(&mut self) -> Vec<WatchOp> {
        self.channel.borrow_mut().take_watch_ops()
    }

    /// Records that the task's waker fired, releasing a pending park.
    pub fn mark_woken(&mut self) {
        self.channel.borrow_mut().woken = true;
    }

    /// Releases the socket and the task. Returns `false` if the record was
    /// already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.task = None;
        self.watched.clear();
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        true
    }

    /// Advances the record after a readiness event or a wakeup.
    pub fn service(&mut self, env: &ServiceEnv<'_>) -> Outcome {
        if self.closed {
            return Outcome::Evict;
        }
        if self.sleeping {
            return Outcome::Idle;
        }
        self.last_active = env.now;

        if let Err(e) = self.read_available() {
            debug!(conn = self.id, error = %e, "connection reset");
            return Outcome::Evict;
        }

        match self.state {
            ParseState::Error => return self.reject_malformed(),
            ParseState::Init if self.eof => return Outcome::Evict,
            ParseState::Init => return Outcome::Wait(Interest::Read),
            _ => {}
        }

        if self.route.get().is_none() && !self.closing {
            if let Some(outcome) = self.bind(env) {
                return outcome;
            }
        }
        self.drive(env)
    }

    fn read_available(&mut self) -> io::Result<()> {
        let mut buf = [0u8; READ_BUF];
        loop {
            let res = match self.stream.as_mut() {
                Some(stream) => stream.read(&mut buf),
                None => return Ok(()),
            };
            match res {
                Ok(0) => {
                    self.eof = true;
                    if self.state < ParseState::MessageComplete {
                        self.feed(&[]);
                    }
                    return Ok(());
                }
                Ok(n) => {
                    if self.state < ParseState::MessageComplete {
                        self.feed(&buf[..n]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn feed(&mut self, data: &[u8]) {
        let res = self.parser.execute(data, &mut self.builder);

        if self.builder.headers_complete && self.head.is_none() {
            self.head = Some(Rc::new(self.builder.build_head()));
            self.state.advance(ParseState::HeadersComplete);
        }

        let mut ch = self.channel.borrow_mut();
        if !self.builder.body.is_empty() {
            ch.body.unsplit(self.builder.body.split());
        }
        if self.builder.message_complete {
            ch.message_complete = true;
            self.state.advance(ParseState::MessageComplete);
        }
        drop(ch);

        if let Err(e) = res {
            debug!(conn = self.id, error = %e, "malformed request");
            self.too_large = matches!(e, ParseError::BodyTooLarge(_));
            self.state.advance(ParseState::Error);
        }
    }

    /// Routes the request and starts its task. Returns an outcome when the
    /// request ends here.
    fn bind(&mut self, env: &ServiceEnv<'_>) -> Option<Outcome> {
        let head = self.head.clone()?;
        let found = env.router.lookup(head.method, &head.path, &head.accept);
        if let Some(log) = env.request_log {
            log(&*head, found.as_ref().map(|m| m.id));
        }

        let Some(m) = found else {
            debug!(conn = self.id, method = %head.method, path = %head.path, "no route");
            return Some(self.respond_and_close(&Response::not_found()));
        };

        let binding = Rc::new(RouteBinding {
            handler: m.handler.clone(),
            id: m.id.to_string(),
            captures: m.captures,
            scope: m.scope.to_string(),
            format: m.format,
        });
        if self.route.set(binding.clone()).is_err() {
            return None;
        }
        self.channel.borrow_mut().format = binding.format.clone();

        let waker = env.handle.waker(self.id);
        let ex = Exchange::new(self.id, head, binding.clone(), self.channel.clone(), waker.clone());
        self.task = Some(Task::new(binding.handler.call(ex), waker));
        None
    }

    fn reject_malformed(&mut self) -> Outcome {
        if self.route.get().is_some() {
            return Outcome::Evict;
        }
        if self.closing {
            return self.drain();
        }
        if self.too_large {
            return self.respond_and_close(&Response::payload_too_large());
        }
        self.respond_and_close(&Response::bad_request())
    }

    fn respond_and_close(&mut self, resp: &Response) -> Outcome {
        self.closing = true;
        // Headers cannot have been sent: no task ever ran.
        let _ = self.channel.borrow_mut().send_response(resp);
        self.drain()
    }

    fn flush(&mut self) -> io::Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(true);
        };
        let mut ch = self.channel.borrow_mut();
        writer::flush(stream, &mut ch.outbox)
    }

    /// Flushes what is left and closes once the outbox is empty.
    fn drain(&mut self) -> Outcome {
        match self.flush() {
            Ok(true) => Outcome::Evict,
            Ok(false) => Outcome::Wait(Interest::ReadWrite),
            Err(e) => {
                debug!(conn = self.id, error = %e, "write failed");
                Outcome::Evict
            }
        }
    }

    fn drive(&mut self, env: &ServiceEnv<'_>) -> Outcome {
        for _ in 0..RESUME_BUDGET {
            if self.closing {
                return self.drain();
            }
            let flushed = match self.flush() {
                Ok(flushed) => flushed,
                Err(e) => {
                    debug!(conn = self.id, error = %e, "write failed");
                    return Outcome::Evict;
                }
            };
            if !flushed && self.blocked_on_write {
                return Outcome::Wait(Interest::ReadWrite);
            }

            let Some(task) = self.task.as_mut() else {
                return Outcome::Evict;
            };
            let reason = task.resume(&self.channel);
            self.blocked_on_write = matches!(reason, SuspendReason::Writing);

            match reason {
                SuspendReason::Writing => continue,
                SuspendReason::Reading => {
                    return match self.flush() {
                        Ok(true) => Outcome::Wait(Interest::Read),
                        Ok(false) => Outcome::Wait(Interest::ReadWrite),
                        Err(_) => Outcome::Evict,
                    };
                }
                SuspendReason::Sleeping { until } => {
                    return match self.flush() {
                        Ok(_) => Outcome::Sleep(until),
                        Err(_) => Outcome::Evict,
                    };
                }
                SuspendReason::TermClose | SuspendReason::Done => self.finish(),
                SuspendReason::Failed(e) => {
                    self.recover(env, &e);
                    self.finish();
                }
            }
        }
        Outcome::Wait(Interest::ReadWrite)
    }

    fn finish(&mut self) {
        self.closing = true;
        self.channel.borrow_mut().finish();
    }

    /// Gives the error handler one chance to answer a failed request.
    fn recover(&mut self, env: &ServiceEnv<'_>, e: &HandlerError) {
        let route = self.route().map(|r| r.id.clone()).unwrap_or_default();
        warn!(conn = self.id, route = %route, error = %e, "handler failed");

        if self.channel.borrow().response.headers_sent {
            return;
        }
        let Some(head) = self.head.as_deref() else {
            return;
        };
        let handler = env.error_handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler(head, e))) {
            Ok(Some(resp)) => {
                let _ = self.channel.borrow_mut().send_response(&resp);
            }
            Ok(None) => {}
            Err(_) => error!(conn = self.id, "error handler panicked"),
        }
    }
}
