use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use super::{cvt, Event, Interest, Poller, Token};

/// kqueue backend. Read and write interest are separate filters, so one
/// descriptor can show up twice in a batch.
pub struct Kqueue {
    fd: OwnedFd,
    buf: Vec<libc::kevent>,
    interests: HashMap<RawFd, Interest>,
}

fn kevent_for(fd: RawFd, filter: i16, flags: u16, token: Token) -> libc::kevent {
    // SAFETY: kevent is plain old data; zeroed covers platform-specific tail fields.
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = fd as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev.udata = token as usize as _;
    ev
}

impl Kqueue {
    pub fn new(max_events: usize) -> io::Result<Self> {
        let raw = cvt(unsafe { libc::kqueue() })?;
        // SAFETY: kqueue returned a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        let max_events = max_events.max(1);
        Ok(Self {
            fd,
            // SAFETY: see kevent_for.
            buf: vec![unsafe { std::mem::zeroed() }; max_events],
            interests: HashMap::new(),
        })
    }

    fn apply(&self, changes: &[libc::kevent]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        cvt(unsafe {
            libc::kevent(
                self.fd.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as _,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        })?;
        Ok(())
    }
}

impl Poller for Kqueue {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut changes = vec![kevent_for(fd, libc::EVFILT_READ as i16, libc::EV_ADD as u16, token)];
        if interest.is_writable() {
            changes.push(kevent_for(fd, libc::EVFILT_WRITE as i16, libc::EV_ADD as u16, token));
        }
        self.apply(&changes)?;
        self.interests.insert(fd, interest);
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let previous = self.interests.get(&fd).copied().unwrap_or(Interest::Read);
        let mut changes = vec![kevent_for(fd, libc::EVFILT_READ as i16, libc::EV_ADD as u16, token)];
        match (previous.is_writable(), interest.is_writable()) {
            (false, true) | (true, true) => {
                changes.push(kevent_for(fd, libc::EVFILT_WRITE as i16, libc::EV_ADD as u16, token));
            }
            (true, false) => {
                changes.push(kevent_for(fd, libc::EVFILT_WRITE as i16, libc::EV_DELETE as u16, token));
            }
            (false, false) => {}
        }
        self.apply(&changes)?;
        self.interests.insert(fd, interest);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let interest = self.interests.remove(&fd).unwrap_or(Interest::Read);
        let mut changes = vec![kevent_for(fd, libc::EVFILT_READ as i16, libc::EV_DELETE as u16, 0)];
        if interest.is_writable() {
            changes.push(kevent_for(fd, libc::EVFILT_WRITE as i16, libc::EV_DELETE as u16, 0));
        }
        self.apply(&changes)
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Duration) -> io::Result<()> {
        events.clear();
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as _,
            tv_nsec: timeout.subsec_nanos() as _,
        };
        let n = unsafe {
            libc::kevent(
                self.fd.as_raw_fd(),
                ptr::null(),
                0,
                self.buf.as_mut_ptr(),
                self.buf.len() as _,
                &ts,
            )
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for raw in &self.buf[..n as usize] {
            let filter = raw.filter as i16;
            let flags = raw.flags as u16;
            events.push(Event {
                token: raw.udata as usize as Token,
                readable: filter == libc::EVFILT_READ as i16,
                writable: filter == libc::EVFILT_WRITE as i16,
                eof: flags & (libc::EV_EOF as u16) != 0,
            });
        }
        Ok(())
    }
}
