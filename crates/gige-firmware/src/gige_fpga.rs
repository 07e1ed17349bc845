//! FPGA-based GigE cameras: a 44 KiB firmware image, optionally preceded by
//! an FPGA configuration bitstream from a `.fwpack` package.

use tracing::{debug, info, warn};

use crate::config::UpdateConfig;
use crate::consts::{FLASH_LOCK, FLASH_UNLOCK_CODE, REBOOT_REGISTER, WARM_REBOOT};
use crate::file::{pad4, Archive, FirmwareFile};
use crate::progress::Progress;
use crate::status::{FirmwareError, Outcome};
use crate::writer::FirmwareWriter;
use crate::xml::Element;

const FIRMWARE_SIZE: usize = 0xB000;
const FIRMWARE_BASE: u32 = 0xEE00_0000;
const FIRMWARE_BLOCK: usize = 128;

const FPGA_VERSION: u32 = 0xF000_0024;
const FPGA_LOCK: u32 = 0xC100_0000;
const FPGA_ERASE: u32 = 0xC100_0004;
const FPGA_BASE: u32 = 0xC000_0000;
const FPGA_WINDOW: u32 = 0x8_0000;
const FPGA_ERASE_STEP: u32 = 0x1_0000;
const FPGA_BLOCK: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    firmware_file: String,
    fpga_file: String,
    required_fpga: u32,
}

pub(crate) async fn upgrade<W>(
    dev: &mut W,
    file: &FirmwareFile,
    model: &str,
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<Outcome, FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    if file.is_package() {
        from_package(dev, file, model, progress, config).await
    } else {
        direct(dev, file, progress, config).await
    }
}

async fn direct<W>(
    dev: &mut W,
    file: &FirmwareFile,
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<Outcome, FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    let image = file.padded();
    check_firmware_size(&image)?;
    upload_firmware(dev, &image, progress, config).await?;
    Ok(reboot(dev).await)
}

async fn from_package<W>(
    dev: &mut W,
    file: &FirmwareFile,
    model: &str,
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<Outcome, FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    let mut archive = file.archive()?;
    let entry = find_in_index(&mut archive, model)?;

    let fpga_upgrade_required = match dev.read_u32(FPGA_VERSION, None).await {
        Ok(version) => {
            debug!(version, required = entry.required_fpga, "device FPGA version");
            version != entry.required_fpga
        }
        Err(err) => {
            debug!(%err, "FPGA version unreadable");
            true
        }
    };

    let fpga = archive.read(&entry.fpga_file)?.unwrap_or_default();
    let firmware = archive.read(&entry.firmware_file)?.unwrap_or_default();
    if fpga_upgrade_required && fpga.is_empty() {
        return Err(FirmwareError::invalid(format!(
            "FPGA configuration '{}' is missing or empty",
            entry.fpga_file
        )));
    }
    check_firmware_size(&firmware)?;

    if fpga_upgrade_required {
        info!(file = %entry.fpga_file, "updating FPGA configuration");
        upload_fpga_configuration(dev, &pad4(fpga), progress, config).await?;
    } else {
        info!("FPGA configuration up to date");
    }

    upload_firmware(dev, &firmware, progress, config).await?;

    if fpga_upgrade_required {
        return Ok(Outcome::DisconnectRequired);
    }
    Ok(reboot(dev).await)
}

fn check_firmware_size(image: &[u8]) -> Result<(), FirmwareError> {
    if image.len() != FIRMWARE_SIZE {
        return Err(FirmwareError::invalid(format!(
            "firmware image must be {FIRMWARE_SIZE:#x} bytes, got {:#x}",
            image.len()
        )));
    }
    Ok(())
}

fn find_in_index(archive: &mut Archive<'_>, model: &str) -> Result<IndexEntry, FirmwareError> {
    let text = match archive.read_text("index.xml")? {
        Some(text) => text,
        None => archive
            .read_text("Index.xml")?
            .ok_or_else(|| FirmwareError::invalid("package has no index.xml"))?,
    };
    let root = Element::parse(&text)?;
    if root.name != "firmwares" {
        return Err(FirmwareError::invalid("index.xml root is not <firmwares>"));
    }
    let firmware = root
        .children_named("firmware")
        .find(|fw| fw.attr("name") == Some(model))
        .ok_or_else(|| FirmwareError::NoMatchFoundInPackage(model.to_string()))?;

    let attr = |key: &str| {
        firmware
            .attr(key)
            .map(str::to_string)
            .ok_or_else(|| FirmwareError::invalid(format!("firmware entry lacks '{key}'")))
    };
    Ok(IndexEntry {
        firmware_file: attr("firmwarefile")?,
        fpga_file: attr("fpgafile")?,
        required_fpga: firmware
            .number_attr("requiredfpga")
            .ok_or_else(|| FirmwareError::invalid("firmware entry lacks a numeric 'requiredfpga'"))?,
    })
}

async fn upload_fpga_configuration<W>(
    dev: &mut W,
    data: &[u8],
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<(), FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    progress.report(0, "Start Erase");
    dev.write_u32(FPGA_LOCK, FLASH_UNLOCK_CODE, None)
        .await
        .map_err(FirmwareError::WriteError)?;

    let result: Result<(), FirmwareError> = async {
        for offset in (0..FPGA_WINDOW).step_by(FPGA_ERASE_STEP as usize) {
            dev.write_u32(FPGA_ERASE, FPGA_BASE + offset, Some(config.erase_timeout))
                .await
                .map_err(|err| {
                    warn!(%err, "FPGA flash erase failed");
                    FirmwareError::VerificationFailed {
                        address: FPGA_BASE + offset,
                    }
                })?;
            progress.report(100 * offset / FPGA_WINDOW, "Erasing");
        }
        progress.report(100, "");

        progress.report(0, "Uploading");
        upload_blocks(dev, FPGA_BASE, data, FPGA_BLOCK, progress, config).await
    }
    .await;

    relock(dev, FPGA_LOCK).await;
    result?;
    progress.report(100, "Finished");
    Ok(())
}

async fn upload_firmware<W>(
    dev: &mut W,
    image: &[u8],
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<(), FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    progress.report(0, "Uploading");
    dev.write_u32(FLASH_LOCK, FLASH_UNLOCK_CODE, None)
        .await
        .map_err(FirmwareError::WriteError)?;
    let result = upload_blocks(dev, FIRMWARE_BASE, image, FIRMWARE_BLOCK, progress, config).await;
    relock(dev, FLASH_LOCK).await;
    result?;
    progress.report(100, "Finished");
    Ok(())
}

async fn upload_blocks<W>(
    dev: &mut W,
    base: u32,
    data: &[u8],
    block: usize,
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<(), FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    for (index, chunk) in data.chunks(block).enumerate() {
        let offset = index * block;
        upload_and_verify(dev, base + offset as u32, chunk, config).await?;
        progress.report((offset * 100 / data.len()) as u32, "");
    }
    Ok(())
}

/// Write `block`, read it back and compare, retrying mismatches.
async fn upload_and_verify<W>(
    dev: &mut W,
    address: u32,
    block: &[u8],
    config: &UpdateConfig,
) -> Result<(), FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    let timeout = Some(config.long_timeout);
    let mut readback = vec![0u8; block.len()];
    for attempt in 1..=config.verify_attempts.max(1) {
        let written = dev.write(address, block, timeout).await;
        let read = match written {
            Ok(()) => dev.read(address, &mut readback, timeout).await,
            Err(err) => Err(err),
        };
        match read {
            Ok(n) if n == block.len() && readback == block => return Ok(()),
            Ok(_) => debug!(address, attempt, "read-back mismatch"),
            Err(err) => {
                warn!(%err, "block transfer failed");
                return Err(FirmwareError::VerificationFailed { address });
            }
        }
    }
    warn!(address, "block failed verification");
    Err(FirmwareError::VerificationFailed { address })
}

async fn relock<W: FirmwareWriter + ?Sized>(dev: &mut W, lock: u32) {
    if let Err(err) = dev.write_u32(lock, 0, None).await {
        warn!(%err, "unable to re-lock flash");
    }
}

async fn reboot<W: FirmwareWriter + ?Sized>(dev: &mut W) -> Outcome {
    match dev.write_u32(REBOOT_REGISTER, WARM_REBOOT, None).await {
        Ok(()) => Outcome::Success,
        Err(err) => {
            info!(%err, "device did not accept the reboot command");
            Outcome::DisconnectRequired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::tests::package;
    use crate::writer::mock::MockWriter;

    const INDEX: &str = r#"<firmwares>
        <firmware name="DFK 23G618" firmwarefile="fw.bin" fpgafile="fpga.bin" requiredfpga="7"/>
        <firmware name="DMK 23G445" firmwarefile="fw.bin" fpgafile="fpga.bin"/>
    </firmwares>"#;

    fn pack(index_name: &str) -> FirmwareFile {
        let firmware = vec![0x11u8; FIRMWARE_SIZE];
        let fpga = vec![0x22u8; 1000];
        package(&[
            (index_name, INDEX.as_bytes()),
            ("fw.bin", &firmware),
            ("fpga.bin", &fpga),
        ])
    }

    async fn run(
        dev: &mut MockWriter,
        file: &FirmwareFile,
        model: &str,
    ) -> (Result<Outcome, FirmwareError>, Vec<(u32, String)>) {
        let mut seen = Vec::new();
        let mut sink = |p: u32, label: &str| seen.push((p, label.to_string()));
        let mut progress = Progress::new(&mut sink);
        let result = upgrade(dev, file, model, &mut progress, &UpdateConfig::immediate()).await;
        drop(progress);
        (result, seen)
    }

    #[tokio::test]
    async fn current_fpga_skips_configuration_and_reboots() {
        let mut dev = MockWriter::default();
        dev.set_word(FPGA_VERSION, 7);
        let (result, seen) = run(&mut dev, &pack("index.xml"), "DFK 23G618").await;
        assert_eq!(result.expect("upgrade"), Outcome::Success);
        assert!(dev.words_written(FPGA_LOCK).is_empty());
        assert_eq!(dev.words_written(REBOOT_REGISTER), vec![WARM_REBOOT]);
        assert_eq!(dev.bytes(FIRMWARE_BASE, FIRMWARE_SIZE), vec![0x11u8; FIRMWARE_SIZE]);
        assert_eq!(dev.block_writes().len(), FIRMWARE_SIZE / FIRMWARE_BLOCK);
        assert_eq!(seen.first().map(|(_, l)| l.as_str()), Some("Uploading"));
        assert_eq!(seen.last(), Some(&(100, "Finished".to_string())));
    }

    #[tokio::test]
    async fn outdated_fpga_is_flashed_and_needs_disconnect() {
        let mut dev = MockWriter::default();
        dev.set_word(FPGA_VERSION, 6);
        let (result, seen) = run(&mut dev, &pack("Index.xml"), "DFK 23G618").await;
        assert_eq!(result.expect("upgrade"), Outcome::DisconnectRequired);
        assert_eq!(dev.words_written(FPGA_LOCK), vec![FLASH_UNLOCK_CODE, 0]);
        let erased = dev.words_written(FPGA_ERASE);
        assert_eq!(erased.len(), 8);
        assert_eq!(erased[0], FPGA_BASE);
        assert_eq!(erased[7], FPGA_BASE + 0x7_0000);
        assert_eq!(dev.bytes(FPGA_BASE, 1000), vec![0x22u8; 1000]);
        assert!(dev.words_written(REBOOT_REGISTER).is_empty());
        assert_eq!(seen[0], (0, "Start Erase".to_string()));
        assert!(seen.iter().any(|(_, l)| l == "Erasing"));
    }

    #[tokio::test]
    async fn index_problems_are_reported_before_io() {
        let mut dev = MockWriter::default();
        let (result, _) = run(&mut dev, &pack("index.xml"), "DFK 99Z").await;
        assert!(matches!(result, Err(FirmwareError::NoMatchFoundInPackage(m)) if m == "DFK 99Z"));
        let (result, _) = run(&mut dev, &pack("index.xml"), "DMK 23G445").await;
        assert!(matches!(result, Err(FirmwareError::InvalidFile(_))));
        let (result, _) = run(&mut dev, &pack("readme.xml"), "DFK 23G618").await;
        assert!(matches!(result, Err(FirmwareError::InvalidFile(_))));
        assert!(dev.writes.is_empty());
    }

    #[tokio::test]
    async fn verification_retries_then_fails() {
        let mut dev = MockWriter::default();
        dev.set_word(FPGA_VERSION, 7);
        dev.corrupt_reads = 4;
        let (result, _) = run(&mut dev, &pack("index.xml"), "DFK 23G618").await;
        assert_eq!(result.expect("upgrade"), Outcome::Success);
        assert_eq!(dev.block_writes().len(), FIRMWARE_SIZE / FIRMWARE_BLOCK + 4);

        let mut dev = MockWriter::default();
        dev.set_word(FPGA_VERSION, 7);
        dev.corrupt_reads = 5;
        let (result, _) = run(&mut dev, &pack("index.xml"), "DFK 23G618").await;
        assert!(matches!(
            result,
            Err(FirmwareError::VerificationFailed { address: FIRMWARE_BASE })
        ));
        assert_eq!(dev.words_written(FLASH_LOCK), vec![FLASH_UNLOCK_CODE, 0]);
        assert!(dev.words_written(REBOOT_REGISTER).is_empty());
    }

    #[tokio::test]
    async fn raw_image_path() {
        let mut dev = MockWriter::default();
        dev.reject_writes.insert(REBOOT_REGISTER);
        let file = FirmwareFile::from_bytes("cam.fw", vec![0x33; FIRMWARE_SIZE]);
        let (result, _) = run(&mut dev, &file, "ignored").await;
        assert_eq!(result.expect("upgrade"), Outcome::DisconnectRequired);

        let short = FirmwareFile::from_bytes("cam.fw", vec![0x33; 100]);
        let mut dev = MockWriter::default();
        let (result, _) = run(&mut dev, &short, "ignored").await;
        assert!(matches!(result, Err(FirmwareError::InvalidFile(_))));
        assert!(dev.writes.is_empty());
    }

    #[tokio::test]
    async fn rejected_unlock_is_write_error() {
        let mut dev = MockWriter::default();
        dev.set_word(FPGA_VERSION, 7);
        dev.reject_writes.insert(FLASH_LOCK);
        let (result, _) = run(&mut dev, &pack("index.xml"), "DFK 23G618").await;
        assert!(matches!(result, Err(FirmwareError::WriteError(_))));
    }
}
