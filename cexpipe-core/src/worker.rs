//! Worker side of process isolation.
//!
//! The parent spawns the worker with the Channel coordinates on its command
//! line and the `WireRequest` JSON on stdin. The worker performs the request
//! once and publishes the `Delivery` to the Channel. It never retries; that is
//! the parent's job.

use std::io::Read;

use log::{debug, error};

use crate::channel::{Channel, ChannelKey};
use crate::domain::WireRequest;
use crate::executor::Transport;

/// A delivery (ok or rejected) was published.
pub const EXIT_DELIVERED: i32 = 0;
/// Nothing was published; the parent may retry.
pub const EXIT_TRANSIENT: i32 = 1;

/// Run one attempt and return the process exit code.
pub fn run_worker(mut input: impl Read, transport: &dyn Transport, channel: &Channel, key: &ChannelKey) -> i32 {
    let mut raw = Vec::new();
    if let Err(e) = input.read_to_end(&mut raw) {
        error!("worker {}: cannot read request: {e}", key.file_name());
        return EXIT_TRANSIENT;
    }
    let wire: WireRequest = match serde_json::from_slice(&raw) {
        Ok(wire) => wire,
        Err(e) => {
            error!("worker {}: bad request: {e}", key.file_name());
            return EXIT_TRANSIENT;
        }
    };
    debug!("worker {}: {} {}", key.file_name(), wire.method.as_str(), wire.url);

    let delivery = match transport.send(&wire) {
        Ok(delivery) => delivery,
        Err(e) => {
            error!("worker {}: {e}", key.file_name());
            return EXIT_TRANSIENT;
        }
    };
    match channel.write(key, &delivery) {
        Ok(()) => EXIT_DELIVERED,
        Err(e) => {
            error!("worker {}: cannot publish: {e}", key.file_name());
            EXIT_TRANSIENT
        }
    }
}
