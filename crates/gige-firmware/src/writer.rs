//! Device access capability used by every update routine.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A device register or memory access the device refused or never answered.
#[derive(Debug, Error)]
#[error("access to {address:#010x} failed: {reason}")]
pub struct AccessError {
    pub address: u32,
    pub reason: String,
}

impl AccessError {
    pub fn new(address: u32, reason: impl Into<String>) -> Self {
        Self {
            address,
            reason: reason.into(),
        }
    }
}

/// Word and block access to device memory.
///
/// `timeout` overrides the transport's per-receive timeout; `None` keeps the
/// default.
#[async_trait]
pub trait FirmwareWriter: Send {
    async fn write_u32(
        &mut self,
        address: u32,
        value: u32,
        timeout: Option<Duration>,
    ) -> Result<(), AccessError>;

    async fn write(
        &mut self,
        address: u32,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), AccessError>;

    async fn read_u32(&mut self, address: u32, timeout: Option<Duration>) -> Result<u32, AccessError>;

    /// Fill `buf`, returning the number of bytes the device delivered.
    async fn read(
        &mut self,
        address: u32,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, AccessError>;
}
