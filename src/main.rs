mod demo;

use std::thread;

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ember::config::Config;
use ember::server::{ReactorHandle, listener};

fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let router = demo::routes().compile().context("compiling routes")?;
    let listener_socket = listener::bind(&cfg)?;
    let mut reactor = listener::build(&cfg, router)?;

    spawn_signal_watcher(reactor.handle())?;
    listener::run(&mut reactor, listener_socket)?;

    info!("All connections drained, exiting");
    std::process::exit(0);
}

/// Waits for SIGINT or SIGTERM on a helper thread and asks the loop to quit.
fn spawn_signal_watcher(handle: ReactorHandle) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;

    thread::Builder::new()
        .name("ember-signals".to_string())
        .spawn(move || {
            rt.block_on(async {
                match signal(SignalKind::terminate()) {
                    Ok(mut term) => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {}
                            _ = term.recv() => {}
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "SIGTERM handler unavailable");
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                info!("Shutdown signal received");
                handle.graceful_quit();
            })
        })
        .context("spawning signal thread")?;
    Ok(())
}
