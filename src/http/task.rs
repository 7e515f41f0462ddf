//! Application tasks.
//!
//! A handler runs as a boxed future polled on the loop thread. Each poll is
//! one *resume*; a poll that returns `Pending` is a suspend, and the
//! primitive the handler was waiting on records why in the shared
//! [`Channel`](crate::http::exchange::Channel). A `Pending` with no recorded
//! reason means the handler is waiting on something outside the server and
//! will be resumed through its [`Waker`].

use std::cell::RefCell;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use thiserror::Error;

use crate::http::exchange::{Channel, Exchange};
use crate::http::request::RequestHead;
use crate::http::response::Response;

/// Errors a handler task can end with.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("response headers already sent")]
    HeadersSent,
    // A String keeps the error free of the panic payload's `dyn Any`.
    #[error("handler panicked: {0}")]
    Panic(String),
    #[error("{0}")]
    Message(String),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }
}

/// Why a resumed task handed control back.
#[derive(Debug)]
pub enum SuspendReason {
    /// Waiting for queued response bytes to reach the socket.
    Writing,
    /// Waiting for request body bytes or an auxiliary descriptor.
    Reading,
    /// Parked until `until`, or until an external wakeup when `None`.
    Sleeping { until: Option<Instant> },
    /// Finish the response and close.
    TermClose,
    /// The handler returned normally.
    Done,
    /// The handler returned an error or panicked.
    Failed(HandlerError),
}

pub type BoxTask = Pin<Box<dyn Future<Output = Result<(), HandlerError>>>>;

/// Route target. Any `Fn(Exchange) -> impl Future<Output = Result<(), HandlerError>>`
/// is a handler.
pub trait Handler {
    fn call(&self, ex: Exchange) -> BoxTask;
}

impl<F, Fut> Handler for F
where
    F: Fn(Exchange) -> Fut,
    Fut: Future<Output = Result<(), HandlerError>> + 'static,
{
    fn call(&self, ex: Exchange) -> BoxTask {
        Box::pin(self(ex))
    }
}

pub type HandlerRef = Rc<dyn Handler>;

/// Wraps a handler for registration.
pub fn handler<H: Handler + 'static>(h: H) -> HandlerRef {
    Rc::new(h)
}

/// Produces a response for a failed task, when headers are not sent yet.
pub type ErrorHandler = Rc<dyn Fn(&RequestHead, &HandlerError) -> Option<Response>>;

/// Called once per routed request with (method, path, matched route id).
pub type RequestLog = Rc<dyn Fn(&RequestHead, Option<&str>)>;

pub fn default_error_handler() -> ErrorHandler {
    Rc::new(|_: &RequestHead, _: &HandlerError| Some(Response::internal_error()))
}

pub fn default_request_log() -> RequestLog {
    Rc::new(|head: &RequestHead, route: Option<&str>| match route {
        Some(id) => tracing::info!(method = %head.method, path = %head.path, route = id, "request"),
        None => tracing::info!(method = %head.method, path = %head.path, "request not routed"),
    })
}

/// A running handler.
pub struct Task {
    fut: Option<BoxTask>,
    waker: Waker,
}

impl Task {
    pub fn new(fut: BoxTask, waker: Waker) -> Self {
        Self {
            fut: Some(fut),
            waker,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.fut.is_none()
    }

    /// Polls the handler once. Panics are caught here so a single handler
    /// can never take the loop down.
    pub fn resume(&mut self, channel: &RefCell<Channel>) -> SuspendReason {
        let Some(fut) = self.fut.as_mut() else {
            return SuspendReason::Done;
        };

        let mut cx = Context::from_waker(&self.waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx)));

        let reason = match polled {
            Ok(Poll::Pending) => {
                return channel
                    .borrow_mut()
                    .suspend
                    .take()
                    .unwrap_or(SuspendReason::Sleeping { until: None });
            }
            Ok(Poll::Ready(Ok(()))) => SuspendReason::Done,
            Ok(Poll::Ready(Err(e))) => SuspendReason::Failed(e),
            Err(payload) => SuspendReason::Failed(HandlerError::Panic(panic_message(&*payload))),
        };
        self.fut = None;
        channel.borrow_mut().suspend = None;
        reason
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Wake;
    use std::sync::Arc;

    struct Noop;

    impl Wake for Noop {
        fn wake(self: Arc<Self>) {}
    }

    fn waker() -> Waker {
        Waker::from(Arc::new(Noop))
    }

    #[test]
    fn ready_ok_is_done() {
        let channel = RefCell::new(Channel::default());
        let mut task = Task::new(Box::pin(async { Ok::<(), HandlerError>(()) }), waker());
        assert!(matches!(task.resume(&channel), SuspendReason::Done));
        assert!(task.is_finished());
        assert!(matches!(task.resume(&channel), SuspendReason::Done));
    }

    #[test]
    fn panic_becomes_failure() {
        let channel = RefCell::new(Channel::default());
        let mut task = Task::new(
            Box::pin(async {
                if true {
                    panic!("boom");
                }
                Ok::<(), HandlerError>(())
            }),
            waker(),
        );
        match task.resume(&channel) {
            SuspendReason::Failed(HandlerError::Panic(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unrecorded_pending_is_sleeping() {
        let channel = RefCell::new(Channel::default());
        let mut task = Task::new(Box::pin(std::future::pending::<Result<(), HandlerError>>()), waker());
        assert!(matches!(
            task.resume(&channel),
            SuspendReason::Sleeping { until: None }
        ));
        assert!(!task.is_finished());
    }
}
