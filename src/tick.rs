//! Tick simulator: a dedicated thread that advances the simulation at a
//! fixed, soft cadence. It sleeps for the tick interval between ticks and
//! makes no attempt to compensate for drift.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::info;

use crate::config::Config;
use crate::state::SharedState;

pub fn run(config: Config, shared: SharedState, shutdown: Arc<AtomicBool>) {
    info!("tick thread started");
    while !shutdown.load(Ordering::Relaxed) {
        shared.advance_tick();
        thread::sleep(config.tick_interval());
    }
    info!("tick thread stopped");
}
