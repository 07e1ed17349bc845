//! First-generation (Blackfin) cameras: a single 64 KiB application image.

use tracing::{debug, info, warn};

use crate::config::{pause, UpdateConfig};
use crate::consts::{FLASH_LOCK, FLASH_UNLOCK_CODE, REBOOT_REGISTER};
use crate::file::FirmwareFile;
use crate::status::{FirmwareError, Outcome};
use crate::writer::FirmwareWriter;

const IMAGE_SIZE: usize = 0x10000;
const APP_ADDRESS: u32 = 0xEE02_0000;
const ERASE_APP: u32 = 1 << 2;

pub(crate) async fn upgrade<W>(
    dev: &mut W,
    file: &FirmwareFile,
    config: &UpdateConfig,
) -> Result<Outcome, FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    if file.is_package() {
        return Err(FirmwareError::DeviceSupportsFwOnly);
    }
    let image = file.padded();
    if image.len() != IMAGE_SIZE {
        return Err(FirmwareError::invalid(format!(
            "Blackfin image must be {IMAGE_SIZE:#x} bytes, got {:#x}",
            image.len()
        )));
    }

    dev.write_u32(FLASH_LOCK, FLASH_UNLOCK_CODE, None)
        .await
        .map_err(FirmwareError::WriteError)?;

    if let Err(err) = dev
        .write_u32(REBOOT_REGISTER, ERASE_APP, Some(config.long_timeout))
        .await
    {
        // The erase may outlast the timeout; the write below tells.
        debug!(%err, "erase request unanswered");
    }
    pause(config.settle_delay).await;

    if let Err(err) = dev.write(APP_ADDRESS, &image, Some(config.long_timeout)).await {
        warn!(%err, "Blackfin image write failed");
        return Err(FirmwareError::VerificationFailed {
            address: err.address,
        });
    }

    if let Err(err) = dev.write_u32(FLASH_LOCK, 0, None).await {
        warn!(%err, "unable to re-lock flash");
    }
    info!("Blackfin firmware written");
    Ok(Outcome::DisconnectRequired)
}
