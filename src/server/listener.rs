use std::net::TcpListener;
use std::os::fd::AsRawFd;

use anyhow::Context;
use tracing::info;

use crate::config::Config;
use crate::http::task::{HandlerRef, default_request_log};
use crate::routing::Router;
use crate::server::limits;
use crate::server::poller::cvt;
use crate::server::reactor::Reactor;

/// Binds the configured address with the configured backlog.
pub fn bind(cfg: &Config) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(&cfg.server.listen_addr)
        .with_context(|| format!("binding {}", cfg.server.listen_addr))?;
    // Listening again on a bound socket only updates its backlog.
    let backlog = cfg.server.backlog.min(i32::MAX as u32) as libc::c_int;
    cvt(unsafe { libc::listen(listener.as_raw_fd(), backlog) }).context("setting listen backlog")?;
    info!("Listening on {}", cfg.server.listen_addr);
    Ok(listener)
}

/// Builds a reactor for `router` from the configuration.
pub fn build(cfg: &Config, router: Router<HandlerRef>) -> anyhow::Result<Reactor> {
    limits::raise_nofile(cfg.limits.nofile).context("raising fd limit")?;
    let mut reactor =
        Reactor::new(router, cfg.reactor_options()).context("creating readiness backend")?;
    if cfg.request_log {
        reactor.set_request_log(Some(default_request_log()));
    }
    Ok(reactor)
}

/// Runs `reactor` on `listener` until a graceful quit has drained it.
pub fn run(reactor: &mut Reactor, listener: TcpListener) -> anyhow::Result<()> {
    reactor.run(listener).context("event loop failed")
}
