//! Timeouts and delays of the update routines.

use std::time::Duration;

/// Timing knobs of the update routines.
///
/// Defaults match real hardware; tests zero the delays.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Receive timeout for flash writes and read-backs.
    pub long_timeout: Duration,
    /// Receive timeout for a single FPGA flash block erase.
    pub erase_timeout: Duration,
    /// Pause after erasing before the first write.
    pub settle_delay: Duration,
    /// Write/read-back/compare attempts per block before giving up.
    pub verify_attempts: u32,
    /// Interval between MachXO2 busy polls.
    pub busy_poll_interval: Duration,
    /// Polls before a MachXO2 that stays busy is declared failed.
    pub busy_poll_limit: u32,
    /// Unit of the MachXO2 refresh wait (the device table lists multiples).
    pub refresh_unit: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            long_timeout: Duration::from_millis(3000),
            erase_timeout: Duration::from_millis(5000),
            settle_delay: Duration::from_secs(1),
            verify_attempts: 5,
            busy_poll_interval: Duration::from_millis(1),
            busy_poll_limit: 100_000,
            refresh_unit: Duration::from_secs(1),
        }
    }
}

impl UpdateConfig {
    /// Zero-latency timing for simulated devices.
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            busy_poll_interval: Duration::ZERO,
            busy_poll_limit: 1_000,
            refresh_unit: Duration::ZERO,
            ..Self::default()
        }
    }
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
