//! The event loop.
//!
//! One round ([`Reactor::turn`]):
//!
//! 1. wait on the backend for at most one heartbeat (less if a timer is due)
//! 2. dispatch every ready token once: accept, drain the notifier, or
//!    service the request record the token belongs to
//! 3. loop-check: resume requests woken from other threads or by timers,
//!    evict half-closed connections
//! 4. every `sweep_every` rounds, evict connections idle for longer than the
//!    inactive timeout
//! 5. once a graceful quit was requested and no records remain, stop
//!
//! Everything here runs on the loop thread. The only way in from another
//! thread is a [`ReactorHandle`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::io;
use std::net::TcpListener;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::http::connection::{Outcome, RequestRecord, ServiceEnv, WatchedFd};
use crate::http::exchange::WatchOp;
use crate::http::parser::MAX_BODY_SIZE;
use crate::http::task::{ErrorHandler, HandlerRef, RequestLog, default_error_handler};
use crate::routing::Router;
use crate::server::ConnId;
use crate::server::poller::{self, DefaultPoller, Event, Interest, Poller, Token};
use crate::server::wake::{Notifier, ReactorHandle};

const LISTENER: Token = 0;
const NOTIFIER: Token = 1;
const FIRST_ID: ConnId = 2;

#[derive(Debug, Clone)]
pub struct ReactorOptions {
    /// Longest a single backend wait may block.
    pub heartbeat: Duration,
    /// Connections accepted per listener event.
    pub accept_batch: usize,
    /// Rounds between inactivity sweeps.
    pub sweep_every: u64,
    pub max_events: usize,
    pub inactive_timeout: Duration,
    /// Largest request body accepted before answering 413.
    pub max_body: usize,
}

impl Default for ReactorOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_millis(100),
            accept_batch: 16,
            sweep_every: 10,
            max_events: 1024,
            inactive_timeout: Duration::from_secs(120),
            max_body: MAX_BODY_SIZE,
        }
    }
}

pub struct Reactor<P: Poller = DefaultPoller> {
    poller: P,
    listener: Option<TcpListener>,
    router: Router<HandlerRef>,
    records: HashMap<ConnId, RequestRecord>,
    /// Auxiliary watch tokens and the record they belong to.
    aux: HashMap<Token, ConnId>,
    notifier: Notifier,
    handle: ReactorHandle,
    /// Deadlines tagged with the sleep generation that set them.
    timers: BinaryHeap<Reverse<(Instant, ConnId, u64)>>,
    events: Vec<Event>,
    handled: HashSet<ConnId>,
    next_id: ConnId,
    rounds: u64,
    options: ReactorOptions,
    error_handler: ErrorHandler,
    request_log: Option<RequestLog>,
}

impl Reactor<DefaultPoller> {
    /// Creates the platform backend. Failing here is fatal for the caller.
    pub fn new(router: Router<HandlerRef>, options: ReactorOptions) -> io::Result<Self> {
        let poller = poller::create(options.max_events)?;
        Self::with_poller(poller, router, options)
    }
}

impl<P: Poller> Reactor<P> {
    pub fn with_poller(mut poller: P, router: Router<HandlerRef>, options: ReactorOptions) -> io::Result<Self> {
        let (notifier, shared) = Notifier::new()?;
        poller.register(notifier.rx().as_raw_fd(), NOTIFIER, Interest::Read)?;

        Ok(Self {
            poller,
            listener: None,
            router,
            records: HashMap::new(),
            aux: HashMap::new(),
            notifier,
            handle: ReactorHandle { shared },
            timers: BinaryHeap::new(),
            events: Vec::with_capacity(options.max_events),
            handled: HashSet::new(),
            next_id: FIRST_ID,
            rounds: 0,
            options,
            error_handler: default_error_handler(),
            request_log: None,
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    pub fn router(&self) -> &Router<HandlerRef> {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router<HandlerRef> {
        &mut self.router
    }

    pub fn set_inactive_timeout(&mut self, timeout: Duration) {
        self.options.inactive_timeout = timeout;
    }

    /// Installs (or removes) the per-request summary callback.
    pub fn set_request_log(&mut self, log: Option<RequestLog>) {
        self.request_log = log;
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.error_handler = handler;
    }

    pub fn connections(&self) -> usize {
        self.records.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn record(&self, id: ConnId) -> Option<&RequestRecord> {
        self.records.get(&id)
    }

    pub fn record_mut(&mut self, id: ConnId) -> Option<&mut RequestRecord> {
        self.records.get_mut(&id)
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Starts accepting on `listener`. The socket is switched to
    /// non-blocking mode here.
    pub fn listen(&mut self, listener: TcpListener) -> io::Result<()> {
        listener.set_nonblocking(true)?;
        self.poller
            .register(listener.as_raw_fd(), LISTENER, Interest::Read)?;
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "accepting connections");
        }
        self.listener = Some(listener);
        Ok(())
    }

    /// Runs rounds until a graceful quit has drained every connection.
    pub fn run(&mut self, listener: TcpListener) -> io::Result<()> {
        self.listen(listener)?;
        while self.turn()? {}
        info!(rounds = self.rounds, "event loop finished");
        Ok(())
    }

    /// Stops accepting; the loop ends once in-flight requests are done.
    pub fn graceful_quit(&self) {
        self.handle.graceful_quit();
    }

    /// Runs exactly one round. Returns `false` once the loop should stop.
    pub fn turn(&mut self) -> io::Result<bool> {
        self.rounds += 1;
        let timeout = self.next_timeout(Instant::now());
        self.poller.wait(&mut self.events, timeout)?;

        self.handled.clear();
        let events = std::mem::take(&mut self.events);
        for ev in &events {
            match ev.token {
                LISTENER => self.accept_batch(),
                NOTIFIER => self.notifier.drain(),
                token => self.dispatch(token, ev),
            }
        }
        self.events = events;

        let now = Instant::now();
        self.loop_check(now);
        if self.rounds % self.options.sweep_every.max(1) == 0 {
            self.sweep(now);
        }

        if self.handle.shared.quitting() {
            self.stop_accepting();
            if self.records.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn next_timeout(&self, now: Instant) -> Duration {
        match self.timers.peek() {
            Some(Reverse((deadline, _, _))) => {
                self.options.heartbeat.min(deadline.saturating_duration_since(now))
            }
            None => self.options.heartbeat,
        }
    }

    fn accept_batch(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        for _ in 0..self.options.accept_batch {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(peer = %peer, error = %e, "set_nonblocking failed");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);

                    let id = self.next_id;
                    self.next_id += 1;
                    if let Err(e) = self.poller.register(stream.as_raw_fd(), id, Interest::Read) {
                        warn!(peer = %peer, error = %e, "register failed");
                        continue;
                    }
                    debug!(conn = id, peer = %peer, "accepted");
                    let rec = RequestRecord::new(id, stream, Instant::now())
                        .with_body_limit(self.options.max_body);
                    self.records.insert(id, rec);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, token: Token, ev: &Event) {
        let id = if self.records.contains_key(&token) {
            token
        } else {
            match self.aux.get(&token) {
                Some(&id) => id,
                None => return,
            }
        };
        if ev.eof && id == token {
            if let Some(rec) = self.records.get_mut(&id) {
                rec.mark_eof();
            }
        }
        // kqueue reports read and write filters separately.
        if !self.handled.insert(id) {
            return;
        }
        self.service(id);
    }

    fn service(&mut self, id: ConnId) {
        let Some(rec) = self.records.get_mut(&id) else {
            return;
        };
        let env = ServiceEnv {
            router: &self.router,
            handle: &self.handle,
            error_handler: &self.error_handler,
            request_log: self.request_log.as_ref(),
            now: Instant::now(),
        };
        let outcome = rec.service(&env);
        let ops = rec.take_watch_ops();

        self.apply_watch_ops(id, ops);
        self.apply(id, outcome);
    }

    fn apply(&mut self, id: ConnId, outcome: Outcome) {
        match outcome {
            Outcome::Wait(interest) => {
                let Some(rec) = self.records.get_mut(&id) else {
                    return;
                };
                if rec.interest == interest {
                    return;
                }
                if let Some(fd) = rec.fd() {
                    match self.poller.reregister(fd, id, interest) {
                        Ok(()) => rec.interest = interest,
                        Err(e) => warn!(conn = id, error = %e, "reregister failed"),
                    }
                }
            }
            Outcome::Sleep(until) => {
                self.request_sleep(id);
                let Some(rec) = self.records.get_mut(&id) else {
                    return;
                };
                rec.sleep_gen += 1;
                if let Some(deadline) = until {
                    self.timers.push(Reverse((deadline, id, rec.sleep_gen)));
                }
            }
            Outcome::Evict => self.evict(id),
            Outcome::Idle => {}
        }
    }

    fn apply_watch_ops(&mut self, id: ConnId, ops: Vec<WatchOp>) {
        for op in ops {
            let Some(rec) = self.records.get_mut(&id) else {
                return;
            };
            match op {
                WatchOp::Watch { fd, owned } => {
                    let token = self.next_id;
                    self.next_id += 1;
                    let watched = WatchedFd::new(fd, owned, token);
                    if !rec.sleeping {
                        if let Err(e) = self.poller.register(watched.registered(), token, Interest::Read) {
                            warn!(conn = id, fd, error = %e, "watch failed");
                            continue;
                        }
                    }
                    rec.watched.push(watched);
                    self.aux.insert(token, id);
                }
                WatchOp::Unwatch(fd) => {
                    let Some(pos) = rec.watched.iter().position(|w| w.fd == fd) else {
                        continue;
                    };
                    let watched = rec.watched.remove(pos);
                    self.aux.remove(&watched.token);
                    if !rec.sleeping {
                        if let Err(e) = self.poller.deregister(watched.registered()) {
                            debug!(conn = id, fd, error = %e, "unwatch failed");
                        }
                    }
                }
            }
        }
    }

    /// Parks a record: its descriptors stop producing events until it is
    /// woken by a timer or [`ReactorHandle::wakeup`].
    pub fn request_sleep(&mut self, id: ConnId) {
        let Some(rec) = self.records.get_mut(&id) else {
            return;
        };
        if rec.sleeping {
            return;
        }
        rec.sleeping = true;
        if let Some(fd) = rec.fd() {
            if let Err(e) = self.poller.deregister(fd) {
                warn!(conn = id, error = %e, "deregister failed");
            }
        }
        for w in &rec.watched {
            if let Err(e) = self.poller.deregister(w.registered()) {
                warn!(conn = id, fd = w.fd, error = %e, "deregister failed");
            }
        }
    }

    /// Queues a resume for a parked record.
    pub fn request_wakeup(&self, id: ConnId) {
        self.handle.wakeup(id);
    }

    fn wake(&mut self, id: ConnId) {
        let Some(rec) = self.records.get_mut(&id) else {
            return;
        };
        if !rec.sleeping {
            return;
        }
        rec.sleeping = false;
        if let Some(fd) = rec.fd() {
            if let Err(e) = self.poller.register(fd, id, rec.interest) {
                warn!(conn = id, error = %e, "register failed");
            }
        }
        for w in &rec.watched {
            if let Err(e) = self.poller.register(w.registered(), w.token, Interest::Read) {
                warn!(conn = id, fd = w.fd, error = %e, "register failed");
            }
        }
    }

    fn resume(&mut self, id: ConnId) {
        if !self.records.contains_key(&id) {
            return;
        }
        self.wake(id);
        self.service(id);
    }

    fn loop_check(&mut self, now: Instant) {
        while let Some(id) = self.handle.shared.pop_resume() {
            if let Some(rec) = self.records.get_mut(&id) {
                rec.mark_woken();
            }
            self.resume(id);
        }

        while let Some(&Reverse((deadline, id, generation))) = self.timers.peek() {
            if deadline > now {
                break;
            }
            self.timers.pop();
            let due = self
                .records
                .get(&id)
                .is_some_and(|r| r.sleeping && r.sleep_gen == generation);
            if due {
                self.resume(id);
            }
        }

        let half_closed: Vec<ConnId> = self
            .records
            .iter()
            .filter(|(_, r)| r.eof())
            .map(|(id, _)| *id)
            .collect();
        for id in half_closed {
            debug!(conn = id, "peer closed");
            self.evict(id);
        }
    }

    /// Evicts every record idle for longer than the inactive timeout.
    /// Returns how many were evicted.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let timeout = self.options.inactive_timeout;
        let stale: Vec<ConnId> = self
            .records
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.last_active) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for &id in &stale {
            info!(conn = id, "evicting inactive connection");
            self.evict(id);
        }
        stale.len()
    }

    /// Deregisters and closes a record. Evicting an unknown id is a no-op.
    pub fn evict(&mut self, id: ConnId) {
        let Some(mut rec) = self.records.remove(&id) else {
            return;
        };
        if !rec.sleeping {
            if let Some(fd) = rec.fd() {
                if let Err(e) = self.poller.deregister(fd) {
                    debug!(conn = id, error = %e, "deregister failed");
                }
            }
        }
        for w in rec.watched.drain(..) {
            self.aux.remove(&w.token);
            if !rec.sleeping {
                if let Err(e) = self.poller.deregister(w.registered()) {
                    debug!(conn = id, fd = w.fd, error = %e, "deregister failed");
                }
            }
        }
        if rec.close() {
            debug!(conn = id, "evicted");
        }
    }

    fn stop_accepting(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        if let Err(e) = self.poller.deregister(listener.as_raw_fd()) {
            debug!(error = %e, "listener deregister failed");
        }
        info!(in_flight = self.records.len(), "graceful quit: no longer accepting");
    }
}
