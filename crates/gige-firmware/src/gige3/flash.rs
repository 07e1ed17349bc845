//! Memory-mapped flash behind an unlock register and a block erase register.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::package::UploadItem;
use crate::file::pad4;
use crate::progress::Progress;
use crate::status::{FirmwareError, Outcome};
use crate::writer::FirmwareWriter;
use crate::xml::Element;

/// Bytes per write or read request.
const STEP: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPort {
    pub erase_address: u32,
    pub unlock_code: u32,
    pub unlock_address: u32,
    pub block_size: u32,
    pub length: u32,
    pub base_address: u32,
}

impl FlashPort {
    pub(crate) fn configure(element: &Element) -> Result<Self, FirmwareError> {
        let number = |key: &str| {
            element
                .number_attr(key)
                .ok_or_else(|| FirmwareError::invalid(format!("flash port lacks {key}")))
        };
        let port = Self {
            erase_address: number("EraseAddress")?,
            unlock_code: number("UnlockCode")?,
            unlock_address: number("UnlockAddress")?,
            block_size: number("BlockSize")?,
            length: number("Length")?,
            base_address: number("BaseAddress")?,
        };
        if port.block_size == 0 {
            return Err(FirmwareError::invalid("flash port with zero BlockSize"));
        }
        Ok(port)
    }

    /// Every item must name an `Offset` inside the flash, and its padded data
    /// must end inside both the port and the 32-bit address space.
    pub(crate) fn check_items(&self, items: &[UploadItem]) -> Result<(), FirmwareError> {
        for item in items {
            let offset = item
                .param("Offset")
                .ok_or_else(|| FirmwareError::invalid("flash upload item without Offset"))?;
            let end = u64::from(offset) + padded_len(item);
            let inside = offset < self.length && end <= u64::from(self.length);
            if !inside || u64::from(self.base_address) + end > 1 << 32 {
                return Err(FirmwareError::invalid(format!(
                    "flash item at {offset:#x} with {} bytes exceeds the port",
                    item.data.len()
                )));
            }
        }
        Ok(())
    }

    /// Block-aligned erase offsets covering every item, each block once.
    pub(crate) fn erase_blocks(&self, items: &[UploadItem]) -> BTreeSet<u32> {
        let block_size = u64::from(self.block_size);
        let mut blocks = BTreeSet::new();
        for item in items {
            let offset = u64::from(item.param("Offset").unwrap_or(0));
            let end = offset + padded_len(item);
            let mut block = offset - offset % block_size;
            while let Ok(start) = u32::try_from(block) {
                blocks.insert(start);
                block += block_size;
                if block >= end {
                    break;
                }
            }
        }
        blocks
    }

    /// Unlock, erase, then write and verify each item; erase maps to the first
    /// 30 % of `progress`.
    pub(crate) async fn upload<W>(
        &self,
        dev: &mut W,
        items: &[UploadItem],
        progress: &mut Progress<'_>,
    ) -> Result<Outcome, FirmwareError>
    where
        W: FirmwareWriter + ?Sized,
    {
        self.check_items(items)?;
        let blocks = self.erase_blocks(items);
        dev.write_u32(self.unlock_address, self.unlock_code, None)
            .await
            .map_err(FirmwareError::WriteError)?;

        let result = self.erase_and_write(dev, items, &blocks, progress).await;
        if let Err(err) = dev.write_u32(self.unlock_address, 0, None).await {
            warn!(%err, "unable to re-lock flash");
        }
        result.map(|()| Outcome::Success)
    }

    async fn erase_and_write<W>(
        &self,
        dev: &mut W,
        items: &[UploadItem],
        blocks: &BTreeSet<u32>,
        progress: &mut Progress<'_>,
    ) -> Result<(), FirmwareError>
    where
        W: FirmwareWriter + ?Sized,
    {
        {
            let mut erase = progress.sub(0, 30);
            for (index, block) in blocks.iter().enumerate() {
                dev.write_u32(self.erase_address, *block, None)
                    .await
                    .map_err(FirmwareError::WriteError)?;
                erase.report(((index + 1) * 100 / blocks.len()) as u32, "");
            }
            debug!(blocks = blocks.len(), "flash blocks erased");
        }

        let mut uploads = progress.sub(30, 100);
        for (index, item) in items.iter().enumerate() {
            let mut step = uploads.step(index, items.len());
            let data = pad4(item.data.clone());
            let address = self.base_address + item.param("Offset").unwrap_or(0);

            write_memory(dev, address, &data, &mut step.sub(0, 50)).await?;
            let mut readback = vec![0u8; data.len()];
            read_memory(dev, address, &mut readback, &mut step.sub(50, 100)).await?;
            if readback != data {
                warn!(address, "flash verification mismatch");
                return Err(FirmwareError::VerificationFailed { address });
            }
        }
        Ok(())
    }
}

fn padded_len(item: &UploadItem) -> u64 {
    item.data.len().div_ceil(4) as u64 * 4
}

async fn write_memory<W>(
    dev: &mut W,
    address: u32,
    data: &[u8],
    progress: &mut Progress<'_>,
) -> Result<(), FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    let mut written = 0usize;
    for chunk in data.chunks(STEP) {
        dev.write(address + written as u32, chunk, None)
            .await
            .map_err(FirmwareError::WriteError)?;
        written += chunk.len();
        progress.report((written * 100 / data.len()) as u32, "");
    }
    Ok(())
}

async fn read_memory<W>(
    dev: &mut W,
    address: u32,
    buf: &mut [u8],
    progress: &mut Progress<'_>,
) -> Result<(), FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    let total = buf.len();
    let mut read = 0usize;
    for chunk in buf.chunks_mut(STEP) {
        let at = address + read as u32;
        let n = dev
            .read(at, chunk, None)
            .await
            .map_err(FirmwareError::WriteError)?;
        if n != chunk.len() {
            return Err(FirmwareError::WriteError(crate::writer::AccessError::new(
                at,
                format!("short read of {n} bytes"),
            )));
        }
        read += chunk.len();
        progress.report((read * 100 / total) as u32, "");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::mock::MockWriter;

    fn port() -> FlashPort {
        FlashPort {
            erase_address: 0xEF00_0008,
            unlock_code: 0xA35F_B241,
            unlock_address: 0xEF00_0000,
            block_size: 0x1000,
            length: 0x10_0000,
            base_address: 0xEC00_0000,
        }
    }

    fn item(offset: u32, len: usize, fill: u8) -> UploadItem {
        let mut item = UploadItem::new(vec![fill; len]);
        item.params.insert("Offset".into(), offset);
        item
    }

    #[test]
    fn erase_set_is_aligned_and_deduplicated() {
        let items = [
            item(0x0800, 0x1000, 1),
            item(0x1800, 0x10, 2),
            item(0x4000, 0x2001, 3),
        ];
        let blocks: Vec<u32> = port().erase_blocks(&items).into_iter().collect();
        assert_eq!(blocks, vec![0x0000, 0x1000, 0x4000, 0x5000, 0x6000]);
    }

    #[test]
    fn empty_item_still_erases_its_block() {
        let blocks: Vec<u32> = port().erase_blocks(&[item(0x2345, 0, 0)]).into_iter().collect();
        assert_eq!(blocks, vec![0x2000]);
    }

    #[test]
    fn padding_can_reach_the_next_block() {
        let blocks: Vec<u32> = port().erase_blocks(&[item(0x0FFE, 2, 0)]).into_iter().collect();
        assert_eq!(blocks, vec![0x0000, 0x1000]);
    }

    #[test]
    fn items_must_end_inside_the_port() {
        for bad in [
            item(0xFFFF_FFF0, 0x20, 0),
            item(0x0F_FFFC, 5, 0),
            item(0x10_0000, 0, 0),
        ] {
            assert!(
                matches!(port().check_items(&[bad]), Err(FirmwareError::InvalidFile(_))),
                "accepted out-of-range item"
            );
        }
        assert!(port().check_items(&[item(0x0F_FFFC, 4, 0)]).is_ok());

        let high = FlashPort {
            base_address: 0xFFF8_0000,
            ..port()
        };
        assert!(matches!(
            high.check_items(&[item(0x8_0000, 4, 0)]),
            Err(FirmwareError::InvalidFile(_))
        ));
    }

    #[tokio::test]
    async fn out_of_range_item_fails_before_any_io() {
        let mut dev = MockWriter::default();
        let mut sink = |_: u32, _: &str| {};
        let mut progress = Progress::new(&mut sink);
        let result = port()
            .upload(&mut dev, &[item(0xFFFF_FFF0, 0x20, 1)], &mut progress)
            .await;
        assert!(matches!(result, Err(FirmwareError::InvalidFile(_))));
        assert!(dev.words_written(0xEF00_0000).is_empty());
    }

    #[test]
    fn items_need_offsets() {
        let items = [item(0, 4, 0), UploadItem::new(vec![0; 4])];
        assert!(matches!(
            port().check_items(&items),
            Err(FirmwareError::InvalidFile(_))
        ));
    }

    #[tokio::test]
    async fn unlock_erase_write_verify_lock() {
        let mut dev = MockWriter::default();
        let items = [item(0x1000, 1300, 0x5A), item(0x3000, 6, 0xC3)];
        let mut seen = Vec::new();
        let mut sink = |p: u32, _: &str| seen.push(p);
        let mut progress = Progress::new(&mut sink);
        let outcome = port()
            .upload(&mut dev, &items, &mut progress)
            .await
            .expect("upload");
        drop(progress);

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(dev.words_written(0xEF00_0000), vec![0xA35F_B241, 0]);
        assert_eq!(dev.words_written(0xEF00_0008), vec![0x1000, 0x3000]);
        assert_eq!(dev.bytes(0xEC00_1000, 1300), vec![0x5A; 1300]);
        assert_eq!(dev.bytes(0xEC00_3000, 8), vec![0xC3, 0xC3, 0xC3, 0xC3, 0xC3, 0xC3, 0, 0]);
        assert_eq!(
            dev.block_writes(),
            vec![0xEC00_1000, 0xEC00_1200, 0xEC00_1400, 0xEC00_3000]
        );
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.first(), Some(&15));
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn mismatch_is_verification_error_and_relocks() {
        let mut dev = MockWriter::default();
        dev.corrupt_reads = 1;
        let mut sink = |_: u32, _: &str| {};
        let mut progress = Progress::new(&mut sink);
        let result = port()
            .upload(&mut dev, &[item(0, 64, 1)], &mut progress)
            .await;
        assert!(matches!(
            result,
            Err(FirmwareError::VerificationFailed { address: 0xEC00_0000 })
        ));
        assert_eq!(dev.words_written(0xEF00_0000), vec![0xA35F_B241, 0]);
    }

    #[tokio::test]
    async fn rejected_erase_halts() {
        let mut dev = MockWriter::default();
        dev.reject_writes.insert(0xEF00_0008);
        let mut sink = |_: u32, _: &str| {};
        let mut progress = Progress::new(&mut sink);
        let result = port()
            .upload(&mut dev, &[item(0, 64, 1)], &mut progress)
            .await;
        assert!(matches!(result, Err(FirmwareError::WriteError(_))));
        assert!(dev.block_writes().is_empty());
    }
}
