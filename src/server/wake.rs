//! Cross-thread wakeups.
//!
//! Only two things may reach the event loop from another thread: "resume
//! this parked request" and "quit gracefully". Both go through [`Shared`],
//! which never touches the readiness backend. The loop drains the queue once
//! per round; a byte written to a socket pair interrupts the heartbeat wait so
//! the drain happens promptly.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};

use crossbeam_queue::SegQueue;

use crate::server::ConnId;

pub(crate) struct Shared {
    resume: SegQueue<ConnId>,
    quit: AtomicBool,
    tx: UnixStream,
}

impl Shared {
    fn notify(&self) {
        // A full socket buffer already guarantees a pending wakeup.
        match (&self.tx).write(&[1]) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::warn!(error = %e, "wake notifier write failed"),
        }
    }

    pub(crate) fn push_resume(&self, id: ConnId) {
        self.resume.push(id);
        self.notify();
    }

    pub(crate) fn pop_resume(&self) -> Option<ConnId> {
        self.resume.pop()
    }

    pub(crate) fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
        self.notify();
    }

    pub(crate) fn quitting(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

/// The loop-side half: a read end registered with the backend.
pub(crate) struct Notifier {
    rx: UnixStream,
}

impl Notifier {
    pub(crate) fn new() -> io::Result<(Notifier, Arc<Shared>)> {
        let (rx, tx) = UnixStream::pair()?;
        rx.set_nonblocking(true)?;
        tx.set_nonblocking(true)?;
        let shared = Arc::new(Shared {
            resume: SegQueue::new(),
            quit: AtomicBool::new(false),
            tx,
        });
        Ok((Notifier { rx }, shared))
    }

    pub(crate) fn rx(&self) -> &UnixStream {
        &self.rx
    }

    /// Empties the notification socket so level-triggered readiness stops.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

/// Cloneable, `Send` handle to a running reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    pub(crate) shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Stops accepting new connections; the loop returns once every in-flight
    /// request has finished.
    pub fn graceful_quit(&self) {
        self.shared.request_quit();
    }

    /// Asks the loop to resume a parked request. Safe from any thread.
    pub fn wakeup(&self, id: ConnId) {
        self.shared.push_resume(id);
    }

    pub(crate) fn waker(&self, id: ConnId) -> Waker {
        Waker::from(Arc::new(TaskWaker {
            id,
            shared: self.shared.clone(),
        }))
    }
}

/// `std::task::Waker` backing for application tasks.
pub(crate) struct TaskWaker {
    pub(crate) id: ConnId,
    pub(crate) shared: Arc<Shared>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.shared.push_resume(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn waker_enqueues_from_another_thread() {
        let (notifier, shared) = Notifier::new().unwrap();
        let waker = Waker::from(Arc::new(TaskWaker {
            id: 42,
            shared: shared.clone(),
        }));

        thread::spawn(move || waker.wake()).join().unwrap();

        assert_eq!(shared.pop_resume(), Some(42));
        assert_eq!(shared.pop_resume(), None);

        let mut buf = [0u8; 4];
        assert_eq!((&notifier.rx).read(&mut buf).unwrap(), 1);
        notifier.drain();
    }

    #[test]
    fn quit_flag_is_sticky() {
        let (_notifier, shared) = Notifier::new().unwrap();
        let handle = ReactorHandle { shared: shared.clone() };
        assert!(!shared.quitting());
        handle.graceful_quit();
        assert!(shared.quitting());
    }
}
