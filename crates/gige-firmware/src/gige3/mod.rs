//! Third-generation cameras: manifest-driven `.fwpack` packages uploaded
//! group by group through named device ports.

pub mod flash;
mod i2c;
pub mod jedec;
pub mod machxo2;
pub mod package;

use tracing::{debug, info};

use crate::config::UpdateConfig;
use crate::consts::{COLD_REBOOT, REBOOT_REGISTER};
use crate::file::FirmwareFile;
use crate::progress::Progress;
use crate::status::{FirmwareError, Outcome};
use crate::writer::FirmwareWriter;

pub use package::{DevicePort, Package, PortKind, UploadGroup, UploadItem};

/// Upload every group listed for `model`, falling back to `device_model`
/// when the package has no entry for the former.
pub(crate) async fn upgrade<W>(
    dev: &mut W,
    file: &FirmwareFile,
    model: &str,
    device_model: &str,
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<Outcome, FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    if !file.is_package() {
        return Err(FirmwareError::invalid("GigE3 devices need a .fwpack package"));
    }
    let package = Package::load(file)?;
    let groups = package
        .upload_groups(model)
        .or_else(|| package.upload_groups(device_model))
        .ok_or_else(|| FirmwareError::NoMatchFoundInPackage(model.to_string()))?;
    info!(
        model,
        version = package.firmware_version,
        groups = groups.len(),
        "uploading firmware package"
    );

    let mut written = false;
    for (index, group) in groups.iter().enumerate() {
        let port = &package.ports[group.port];
        // Every group is re-applied; the comparison is informational.
        match dev.read_u32(group.version_check_register, None).await {
            Ok(current) => debug!(
                group = %group.name,
                current,
                packaged = group.version,
                upload_required = current != group.version,
                "version check"
            ),
            Err(err) => debug!(group = %group.name, %err, "version register unreadable"),
        }

        let mut step = progress.step(index, groups.len());
        step.report(0, &group.name);
        info!(group = %group.name, port = %port.name, items = group.items.len(), "uploading group");
        let outcome = port.upload(dev, &group.items, &mut step, config).await?;
        written |= outcome != Outcome::NoActionRequired;
    }

    if !written {
        return Ok(Outcome::NoActionRequired);
    }
    match dev.write_u32(REBOOT_REGISTER, COLD_REBOOT, None).await {
        Ok(()) => Ok(Outcome::Success),
        Err(err) => {
            info!(%err, "device did not accept the cold reboot command");
            Ok(Outcome::DisconnectRequired)
        }
    }
}
