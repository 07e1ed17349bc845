#![cfg_attr(docsrs, feature(doc_cfg))]
//! Firmware update for GigE Vision cameras.
//!
//! The upload variant is chosen from the `@Type=N@Model=X@` string a camera
//! reports in its discovery acknowledge:
//!
//! | Type | Variant | Accepted files |
//! |------|---------|----------------|
//! | 0    | Blackfin | raw 64 KiB image |
//! | 1, 2 | GigE-FPGA | raw `0xB000` byte image or `.fwpack` with `index.xml` |
//! | 3, 4 | GigE3 | `.fwpack` with `manifest.xml` |
//!
//! Device access goes through [`FirmwareWriter`], so the state machines can
//! be driven against anything that speaks register and memory transactions.

mod blackfin;
mod config;
mod file;
pub mod gige3;
mod gige_fpga;
mod progress;
mod status;
mod writer;
mod xml;

use gvcp_codec::{DiscoveryAck, ManufacturerInfo};
use tracing::{info, warn};

pub use config::UpdateConfig;
pub use file::FirmwareFile;
pub use gige3::Package;
pub use progress::Progress;
pub use status::{FirmwareError, Outcome, Status};
pub use writer::{AccessError, FirmwareWriter};

/// Registers and magic values shared by every camera generation.
pub mod consts {
    /// Writing [`FLASH_UNLOCK_CODE`] here unlocks the firmware flash, zero locks it.
    pub const FLASH_LOCK: u32 = 0xEF00_0000;
    pub const FLASH_UNLOCK_CODE: u32 = 0xA35F_B241;
    pub const REBOOT_REGISTER: u32 = 0xEF00_0004;
    pub const WARM_REBOOT: u32 = 0xB007_B007;
    pub const COLD_REBOOT: u32 = 0xC01D_B007;
}

/// Upload `file` to the device described by `info`.
///
/// A non-empty `override_model` replaces the model the device reports when
/// looking up package entries.
pub async fn upgrade_firmware<W>(
    dev: &mut W,
    info: &DiscoveryAck,
    file: &FirmwareFile,
    override_model: &str,
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<Outcome, FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    let Some(identity) = ManufacturerInfo::parse(&info.manufacturer_info) else {
        warn!(info = %info.manufacturer_info, "unparseable manufacturer info");
        return Err(FirmwareError::DeviceNotRecognized);
    };
    let model = if override_model.is_empty() {
        identity.model.as_str()
    } else {
        override_model
    };
    info!(
        device = %info.model,
        serial = %info.serial,
        type_id = identity.type_id,
        model,
        file = file.name(),
        "starting firmware upload"
    );

    let result = match identity.type_id {
        0 => blackfin::upgrade(dev, file, config).await,
        1 | 2 => gige_fpga::upgrade(dev, file, model, progress, config).await,
        3 | 4 => gige3::upgrade(dev, file, model, &info.model, progress, config).await,
        _ => Err(FirmwareError::DeviceNotRecognized),
    };
    match &result {
        Ok(outcome) => info!(?outcome, "firmware upload finished"),
        Err(err) => warn!(%err, "firmware upload failed"),
    }
    result
}
