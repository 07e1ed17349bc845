//! I2C master bridged through device memory.
//!
//! A transaction stages the outgoing bytes in the write buffer, triggers it
//! through the command register and collects the answer from the read
//! buffer.

use thiserror::Error;
use tracing::trace;

use crate::writer::{AccessError, FirmwareWriter};

const COMMAND: u32 = 0xE000_0000;
const MAX_WRITE_LENGTH: u32 = 0xE000_0004;
const MAX_READ_LENGTH: u32 = 0xE000_0008;
const WRITE_BUFFER: u32 = 0xE000_1000;
const READ_BUFFER: u32 = 0xE000_2000;

#[derive(Debug, Error)]
pub enum I2cError {
    #[error("the device does not support I2C: {0}")]
    Unsupported(#[source] AccessError),
    #[error("I2C write of {len} bytes exceeds the {max} byte limit")]
    WriteTooLong { len: usize, max: usize },
    #[error("I2C read of {len} bytes exceeds the {max} byte limit")]
    ReadTooLong { len: usize, max: usize },
    #[error(transparent)]
    Access(#[from] AccessError),
}

pub(crate) struct I2cBridge<'a, W: ?Sized> {
    dev: &'a mut W,
    slave: u8,
    max_write: usize,
    max_read: usize,
}

impl<'a, W: FirmwareWriter + ?Sized> I2cBridge<'a, W> {
    /// Query the bridge limits and address `slave` (8-bit form).
    pub async fn open(dev: &'a mut W, slave: u8) -> Result<Self, I2cError> {
        let max_write = dev
            .read_u32(MAX_WRITE_LENGTH, None)
            .await
            .map_err(I2cError::Unsupported)?;
        let max_read = dev
            .read_u32(MAX_READ_LENGTH, None)
            .await
            .map_err(I2cError::Unsupported)?;
        trace!(max_write, max_read, "I2C bridge limits");
        Ok(Self {
            dev,
            slave,
            // The command word carries the lengths in 8 and 16 bits.
            max_write: (max_write as usize).min(u8::MAX as usize),
            max_read: (max_read as usize).min(u16::MAX as usize),
        })
    }

    pub fn max_read(&self) -> usize {
        self.max_read
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), I2cError> {
        self.transaction(data, 0).await.map(drop)
    }

    /// Write `data`, then read `read_len` bytes in one combined transfer.
    pub async fn transaction(&mut self, data: &[u8], read_len: usize) -> Result<Vec<u8>, I2cError> {
        if data.len() > self.max_write {
            return Err(I2cError::WriteTooLong {
                len: data.len(),
                max: self.max_write,
            });
        }
        if read_len > self.max_read {
            return Err(I2cError::ReadTooLong {
                len: read_len,
                max: self.max_read,
            });
        }

        let mut staged = data.to_vec();
        staged.resize(align4(data.len()), 0);
        if !staged.is_empty() {
            self.dev.write(WRITE_BUFFER, &staged, None).await?;
        }

        let command = ((read_len as u32) << 16) | ((data.len() as u32) << 8) | u32::from(self.slave);
        self.dev.write_u32(COMMAND, command, None).await?;

        let mut answer = vec![0u8; align4(read_len)];
        if !answer.is_empty() {
            self.dev.read(READ_BUFFER, &mut answer, None).await?;
        }
        answer.truncate(read_len);
        Ok(answer)
    }

    /// Big-endian word answer to `command`.
    pub async fn read_u32(&mut self, command: &[u8]) -> Result<u32, I2cError> {
        let answer = self.transaction(command, 4).await?;
        Ok(u32::from_be_bytes([answer[0], answer[1], answer[2], answer[3]]))
    }

    pub async fn read_u8(&mut self, command: &[u8]) -> Result<u8, I2cError> {
        let answer = self.transaction(command, 1).await?;
        Ok(answer[0])
    }
}

fn align4(len: usize) -> usize {
    len.div_ceil(4) * 4
}
