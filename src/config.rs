//! Supervisor configuration. The reference server hard-codes worker count,
//! tick interval, client timeout, and the listening port; here they are
//! `clap`-derived flags with the reference's defaults, following
//! `hyperion`'s `clap = { features = ["derive"] }` style.

use std::time::Duration;

use clap::Parser;

pub const DEFAULT_MAP_WIDTH: usize = 40;
pub const DEFAULT_MAP_HEIGHT: usize = 40;
pub const MAX_PLAYERS: usize = 100;
pub const MAX_SNAKE_LENGTH: usize = 100;
pub const INITIAL_FOOD_COUNT: usize = 20;
/// Retry cap for "pick a random interior EMPTY cell" (the original loops
/// with no upper bound). Past this many misses we fall back to a full
/// deterministic scan of the interior.
pub const MAX_PLACEMENT_ATTEMPTS: usize = 256;

#[derive(Debug, Clone, Parser)]
#[command(name = "snake-arena-server", about = "Preforked-equivalent multiplayer snake arena server")]
pub struct Config {
    /// TCP port the server listens on.
    #[arg(long, default_value_t = 8888)]
    pub port: u16,

    /// Number of worker threads (the thread-per-worker analogue of the
    /// reference's `NUM_WORKERS` preforked processes).
    #[arg(long, default_value_t = 8)]
    pub workers: usize,

    /// Tick interval in milliseconds (reference's `TICK_RATE_MS`).
    #[arg(long, default_value_t = 200)]
    pub tick_interval_ms: u64,

    /// Idle-client timeout in seconds (reference's `CLIENT_TIMEOUT_SEC`).
    #[arg(long, default_value_t = 30)]
    pub client_timeout_secs: u64,

    /// Bounded-wait poll timeout per worker loop iteration, in milliseconds
    /// (reference's `select()` timeout of 50ms).
    #[arg(long, default_value_t = 50)]
    pub poll_timeout_ms: u64,

    /// Grid width in cells.
    #[arg(long, default_value_t = DEFAULT_MAP_WIDTH)]
    pub map_width: usize,

    /// Grid height in cells.
    #[arg(long, default_value_t = DEFAULT_MAP_HEIGHT)]
    pub map_height: usize,
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8888,
            workers: 8,
            tick_interval_ms: 200,
            client_timeout_secs: 30,
            poll_timeout_ms: 50,
            map_width: DEFAULT_MAP_WIDTH,
            map_height: DEFAULT_MAP_HEIGHT,
        }
    }
}
