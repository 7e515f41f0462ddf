//! Readiness backends.
//!
//! A [`Poller`] registers raw descriptors under a caller-chosen [`Token`] and
//! blocks for a bounded interval to report which of them are ready. Both
//! backends are level-triggered: a descriptor with unread bytes is reported
//! again on every wait until it is drained.
//!
//! A backend may report the same token more than once in a single batch
//! (kqueue delivers read and write filters as separate events), so callers
//! must dedupe per round.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
mod kqueue;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::Epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub use kqueue::Kqueue;

/// Opaque identifier attached to a registration.
pub type Token = u64;

/// Which readiness a registration is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    ReadWrite,
}

impl Interest {
    pub fn is_writable(self) -> bool {
        matches!(self, Interest::ReadWrite)
    }
}

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// The peer shut down its write side (or the descriptor hung up).
    pub eof: bool,
}

/// Platform readiness primitive.
///
/// Registration calls are not thread-safe; a poller is only ever touched by
/// the thread running the event loop.
pub trait Poller {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    fn reregister(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Blocks for at most `timeout`, replacing the contents of `events` with
    /// the ready batch. An interrupted wait yields an empty batch.
    fn wait(&mut self, events: &mut Vec<Event>, timeout: Duration) -> io::Result<()>;
}

/// The backend native to the current platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type DefaultPoller = Epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub type DefaultPoller = Kqueue;

/// Creates the platform backend. Failure here is fatal for the process.
pub fn create(max_events: usize) -> io::Result<DefaultPoller> {
    DefaultPoller::new(max_events)
}

pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}
