//! Supervisor: creates the shared game state, spawns the worker pool and the
//! tick thread, and tears everything down on a termination signal. This
//! collapses the reference's fork()-based process topology into a single
//! process with a thread-per-worker and an in-process `Arc<Mutex<..>>`; see
//! `state.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

use snake_arena_server::config::Config;
use snake_arena_server::state::SharedState;
use snake_arena_server::{tick, worker};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    info!(?config, "starting snake arena server");

    let shared = SharedState::new(&config);
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handler")?;
    let signal_shutdown = Arc::clone(&shutdown);
    thread::spawn(move || {
        if signals.forever().next().is_some() {
            warn!("shutdown signal received, tearing down");
            signal_shutdown.store(true, Ordering::Relaxed);
        }
    });

    let tick_handle = {
        let config = config.clone();
        let shared = shared.clone();
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || tick::run(config, shared, shutdown))
    };

    let worker_handles: Vec<_> = (0..config.workers)
        .map(|worker_id| {
            let config = config.clone();
            let shared = shared.clone();
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    if let Err(e) = worker::run(worker_id, config, shared, shutdown) {
                        tracing::error!(worker_id, error = %e, "worker exited with error");
                    }
                })
                .expect("failed to spawn worker thread")
        })
        .collect();

    for handle in worker_handles {
        let _ = handle.join();
    }
    let _ = tick_handle.join();

    info!("all threads joined, exiting");
    Ok(())
}
