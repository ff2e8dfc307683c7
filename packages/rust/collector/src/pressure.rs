//! Host memory headroom gate.
//!
//! Dozens of collector processes on one box can push the host into swap.
//! Before a unit is dispatched, the orchestrator may wait for a minimum
//! amount of available memory. The gate only delays; it never cancels —
//! after `max_wait` the unit is dispatched regardless.

use std::time::Duration;

use tracing::{debug, warn};

/// Polling interval while waiting for memory to free up.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Wait until at least `min_free_mb` of host memory is available, or
/// `max_wait` has elapsed. `min_free_mb == 0` disables the gate, as does
/// any platform where `/proc/meminfo` is unreadable.
pub async fn wait_for_headroom(min_free_mb: u64, max_wait: Duration) {
    if min_free_mb == 0 {
        return;
    }

    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        let available = match available_mb() {
            Some(mb) => mb,
            None => return,
        };
        if available >= min_free_mb {
            debug!(available_mb = available, "memory headroom ok");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                available_mb = available,
                min_free_mb, "memory still tight after max wait, dispatching anyway"
            );
            return;
        }
        warn!(
            available_mb = available,
            min_free_mb, "low memory, delaying unit dispatch"
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// `MemAvailable` from `/proc/meminfo`, in megabytes.
fn available_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let kb: u64 = meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;
    Some(kb / 1024)
}
