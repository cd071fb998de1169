//! Library surface for the snake arena server core, so integration tests can
//! drive a real worker + tick pair over a loopback socket without going
//! through `main`'s CLI parsing.

pub mod codec;
pub mod config;
pub mod error;
pub mod state;
pub mod tick;
pub mod worker;
