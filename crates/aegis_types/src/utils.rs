//! Utility functions shared across the platform.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, read from the system clock.
///
/// Every event timestamp goes through here so wall-clock readings agree
/// across the system. A clock set before the epoch reads as zero; ordering
/// guarantees come from bus sequence numbers, never from wall time.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(current_timestamp() > 1_577_836_800);
    }
}
