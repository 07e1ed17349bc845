//! Lattice MachXO2 auxiliary FPGA, programmed through the camera's I2C
//! bridge.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::i2c::{I2cBridge, I2cError};
use super::jedec::JedecFile;
use super::package::UploadItem;
use crate::config::{pause, UpdateConfig};
use crate::progress::Progress;
use crate::status::{FirmwareError, Outcome};
use crate::writer::FirmwareWriter;

/// 8-bit I2C address of the configuration port.
const SLAVE: u8 = 0x80;

mod cmd {
    pub const IDCODE_PUB: [u8; 4] = [0xE0, 0x00, 0x00, 0x00];
    pub const ISC_ENABLE_X: [u8; 3] = [0x74, 0x08, 0x00];
    pub const ERASE_FLASH: [u8; 4] = [0x0E, 0x04, 0x00, 0x00];
    pub const CHECK_BUSY: [u8; 4] = [0xF0, 0x00, 0x00, 0x00];
    pub const READ_STATUS: [u8; 4] = [0x3C, 0x00, 0x00, 0x00];
    pub const INIT_ADDRESS: [u8; 4] = [0x46, 0x00, 0x00, 0x00];
    pub const READ_PAGES: u8 = 0x73;
    pub const PROG_ONE_PAGE: [u8; 4] = [0x70, 0x00, 0x00, 0x01];
    pub const SET_PROGRAM_DONE: [u8; 4] = [0x5E, 0x00, 0x00, 0x00];
    pub const REFRESH: [u8; 3] = [0x79, 0x00, 0x00];
    pub const READ_USERCODE: [u8; 4] = [0xC0, 0x00, 0x00, 0x00];
    pub const PROG_USERCODE: [u8; 4] = [0xC2, 0x00, 0x00, 0x00];
}

const PAGE_SIZE: usize = 16;
/// Page reads are preceded by 32 bytes and each page is followed by 4.
const READ_PREAMBLE: usize = 32;
const READ_STRIDE: usize = PAGE_SIZE + 4;
const MAX_PAGES_PER_READ: usize = 32;

const STATUS_FAIL: u32 = 1 << 13;
const BUSY_FLAG: u8 = 0x80;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    MachXO2_256,
    MachXO2_640,
    MachXO2_640U,
    MachXO2_1200,
    MachXO2_1200U,
    MachXO2_2000,
    MachXO2_2000U,
    MachXO2_4000,
    MachXO2_7000,
}

/// Geometry and timing of one MachXO2 density.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub name: &'static str,
    pub cfg_pages: usize,
    pub ufm_pages: usize,
    pub cfg_erase_ms: u32,
    pub ufm_erase_ms: u32,
    /// Refresh wait in units of [`UpdateConfig::refresh_unit`].
    pub refresh: u32,
}

const fn device(
    kind: DeviceKind,
    name: &'static str,
    cfg_pages: usize,
    ufm_pages: usize,
    cfg_erase_ms: u32,
    ufm_erase_ms: u32,
    refresh: u32,
) -> DeviceInfo {
    DeviceInfo {
        kind,
        name,
        cfg_pages,
        ufm_pages,
        cfg_erase_ms,
        ufm_erase_ms,
        refresh,
    }
}

const DEVICES: [DeviceInfo; 9] = [
    device(DeviceKind::MachXO2_256, "MachXO2-256", 575, 0, 700, 0, 1),
    device(DeviceKind::MachXO2_640, "MachXO2-640", 1152, 191, 1100, 600, 1),
    device(DeviceKind::MachXO2_640U, "MachXO2-640U", 2175, 512, 1400, 700, 1),
    device(DeviceKind::MachXO2_1200, "MachXO2-1200", 2175, 512, 1400, 700, 1),
    device(DeviceKind::MachXO2_1200U, "MachXO2-1200U", 3200, 639, 1900, 900, 2),
    device(DeviceKind::MachXO2_2000, "MachXO2-2000", 3200, 639, 1900, 900, 2),
    device(DeviceKind::MachXO2_2000U, "MachXO2-2000U", 5760, 767, 3100, 1000, 3),
    device(DeviceKind::MachXO2_4000, "MachXO2-4000", 5760, 767, 3100, 1000, 3),
    device(DeviceKind::MachXO2_7000, "MachXO2-7000", 9216, 2046, 4800, 1600, 4),
];

impl DeviceInfo {
    pub fn of(kind: DeviceKind) -> DeviceInfo {
        DEVICES[kind as usize]
    }

    /// Match the part number in a JEDEC `DEVICE NAME:` note.
    pub fn find_by_name(line: &str) -> Option<DeviceInfo> {
        const PARTS: [(&str, DeviceKind); 6] = [
            ("LCMXO2-256", DeviceKind::MachXO2_256),
            ("LCMXO2-640", DeviceKind::MachXO2_640),
            ("LCMXO2-1200", DeviceKind::MachXO2_1200),
            ("LCMXO2-2000", DeviceKind::MachXO2_2000),
            ("LCMXO2-4000", DeviceKind::MachXO2_4000),
            ("LCMXO2-7000", DeviceKind::MachXO2_7000),
        ];
        PARTS
            .iter()
            .find(|(part, _)| line.contains(part))
            .map(|(_, kind)| Self::of(*kind))
    }

    /// Decode an IDCODE (HC and ZE variants).
    pub fn find_by_id(id: u32) -> Option<DeviceInfo> {
        let kind = match id {
            0x012B_0043 | 0x012B_8043 => DeviceKind::MachXO2_256,
            0x012B_1043 | 0x012B_9043 => DeviceKind::MachXO2_640,
            0x012B_2043 | 0x012B_A043 => DeviceKind::MachXO2_1200,
            0x012B_3043 | 0x012B_B043 => DeviceKind::MachXO2_2000,
            0x012B_4043 | 0x012B_C043 => DeviceKind::MachXO2_4000,
            0x012B_5043 | 0x012B_D043 => DeviceKind::MachXO2_7000,
            _ => return None,
        };
        Some(Self::of(kind))
    }
}

#[derive(Debug, Error)]
pub enum MachXo2Error {
    #[error(transparent)]
    Bus(#[from] I2cError),
    #[error("unknown MachXO2 IDCODE {0:#010x}")]
    UnknownDevice(u32),
    #[error("configuration is for {expected}, device is {found}")]
    DeviceMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("device reports failure after {0}")]
    StatusFail(&'static str),
    #[error("device stayed busy")]
    BusyTimeout,
    #[error("I2C read limit too small for page reads")]
    ReadLimit,
    #[error("configuration read-back does not match")]
    VerificationFailed,
}

/// At most one item, holding a fuse map for a known device.
pub(crate) fn check_items(items: &[UploadItem]) -> Result<(), FirmwareError> {
    if items.len() > 1 {
        return Err(FirmwareError::invalid("a MachXO2 port takes a single item"));
    }
    for item in items {
        JedecFile::parse(&item.data).map_err(|err| FirmwareError::invalid(format!("JEDEC: {err}")))?;
    }
    Ok(())
}

pub(crate) async fn upload<W>(
    dev: &mut W,
    items: &[UploadItem],
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<Outcome, FirmwareError>
where
    W: FirmwareWriter + ?Sized,
{
    let Some(item) = items.first() else {
        return Ok(Outcome::NoActionRequired);
    };
    let jedec = JedecFile::parse(&item.data)
        .map_err(|err| FirmwareError::invalid(format!("JEDEC: {err}")))?;

    let result: Result<bool, MachXo2Error> = async {
        let bus = I2cBridge::open(dev, SLAVE).await?;
        let mut device = MachXo2::open(bus, config).await?;
        device.update(&jedec, progress, false).await
    }
    .await;

    match result {
        Ok(true) => Ok(Outcome::Success),
        Ok(false) => Ok(Outcome::NoActionRequired),
        Err(err) => {
            warn!(%err, "MachXO2 update failed");
            Err(FirmwareError::MachXO2UpdateFailed(err.to_string()))
        }
    }
}

struct MachXo2<'a, W: ?Sized> {
    bus: I2cBridge<'a, W>,
    info: DeviceInfo,
    config: &'a UpdateConfig,
}

impl<'a, W: FirmwareWriter + ?Sized> MachXo2<'a, W> {
    async fn open(mut bus: I2cBridge<'a, W>, config: &'a UpdateConfig) -> Result<Self, MachXo2Error> {
        let mut id = bus.read_u32(&cmd::IDCODE_PUB).await?;
        let mut info = DeviceInfo::find_by_id(id);
        if info.is_none() {
            // The first IDCODE read after power-up is sometimes garbage.
            debug!(id, "retrying IDCODE");
            id = bus.read_u32(&cmd::IDCODE_PUB).await?;
            info = DeviceInfo::find_by_id(id);
        }
        let info = info.ok_or(MachXo2Error::UnknownDevice(id))?;
        debug!(device = info.name, "found MachXO2");
        Ok(Self { bus, info, config })
    }

    /// Program `jedec` unless the device already carries its user code.
    /// Returns `false` when nothing had to be written.
    async fn update(
        &mut self,
        jedec: &JedecFile,
        progress: &mut Progress<'_>,
        force: bool,
    ) -> Result<bool, MachXo2Error> {
        if jedec.device.kind != self.info.kind {
            return Err(MachXo2Error::DeviceMismatch {
                expected: jedec.device.name,
                found: self.info.name,
            });
        }
        let current = self.user_code().await?;
        if current == jedec.user_code && !force {
            info!(user_code = current, "MachXO2 configuration up to date");
            return Ok(false);
        }

        progress.report(0, "Writing auxiliary FPGA configuration");
        self.enable_transparent_configuration().await?;
        self.erase_flash().await?;
        self.set_program_done().await?;
        self.refresh().await?;
        pause(self.config.settle_delay).await;

        self.enable_transparent_configuration().await?;
        self.write_configuration(&jedec.configuration, &mut progress.sub(0, 70))
            .await?;

        progress.report(70, "Verifying auxiliary FPGA configuration");
        let readback = self.read_configuration(&mut progress.sub(70, 100)).await?;
        if readback != jedec.configuration {
            self.set_program_done().await?;
            return Err(MachXo2Error::VerificationFailed);
        }
        self.set_program_done().await?;
        self.refresh().await?;

        // The user code only sticks when written after the refresh.
        self.enable_transparent_configuration().await?;
        self.write_user_code(jedec.user_code).await?;
        self.set_program_done().await?;
        info!(user_code = jedec.user_code, "MachXO2 reprogrammed");
        Ok(true)
    }

    async fn user_code(&mut self) -> Result<u32, MachXo2Error> {
        Ok(self.bus.read_u32(&cmd::READ_USERCODE).await?)
    }

    async fn write_user_code(&mut self, code: u32) -> Result<(), MachXo2Error> {
        let mut command = cmd::PROG_USERCODE.to_vec();
        command.extend_from_slice(&code.to_be_bytes());
        Ok(self.bus.write(&command).await?)
    }

    async fn is_busy(&mut self) -> Result<bool, MachXo2Error> {
        Ok(self.bus.read_u8(&cmd::CHECK_BUSY).await? & BUSY_FLAG != 0)
    }

    async fn status_failed(&mut self) -> Result<bool, MachXo2Error> {
        let status = self.bus.read_u32(&cmd::READ_STATUS).await?;
        Ok(status & STATUS_FAIL != 0)
    }

    async fn wait_while_busy(&mut self) -> Result<(), MachXo2Error> {
        for _ in 0..self.config.busy_poll_limit {
            if !self.is_busy().await? {
                return Ok(());
            }
            pause(self.config.busy_poll_interval).await;
        }
        Err(MachXo2Error::BusyTimeout)
    }

    /// Give a short command time to complete.
    async fn settle(&mut self) -> Result<(), MachXo2Error> {
        if self.is_busy().await? {
            self.wait_while_busy().await
        } else {
            pause(self.config.busy_poll_interval).await;
            Ok(())
        }
    }

    async fn enable_transparent_configuration(&mut self) -> Result<(), MachXo2Error> {
        self.bus.write(&cmd::ISC_ENABLE_X).await?;
        self.settle().await?;
        if self.status_failed().await? {
            return Err(MachXo2Error::StatusFail("enabling configuration mode"));
        }
        Ok(())
    }

    async fn erase_flash(&mut self) -> Result<(), MachXo2Error> {
        self.bus.write(&cmd::ERASE_FLASH).await?;
        self.wait_while_busy().await?;
        if self.status_failed().await? {
            return Err(MachXo2Error::StatusFail("erasing flash"));
        }
        Ok(())
    }

    async fn set_program_done(&mut self) -> Result<(), MachXo2Error> {
        self.bus.write(&cmd::SET_PROGRAM_DONE).await?;
        self.settle().await
    }

    async fn refresh(&mut self) -> Result<(), MachXo2Error> {
        self.bus.write(&cmd::REFRESH).await?;
        pause(self.config.refresh_unit * self.info.refresh).await;
        if self.status_failed().await? {
            return Err(MachXo2Error::StatusFail("refresh"));
        }
        Ok(())
    }

    async fn write_configuration(
        &mut self,
        data: &[u8],
        progress: &mut Progress<'_>,
    ) -> Result<(), MachXo2Error> {
        self.bus.write(&cmd::INIT_ADDRESS).await?;
        let pages = self.info.cfg_pages;
        for (page, row) in data.chunks(PAGE_SIZE).take(pages).enumerate() {
            let mut command = cmd::PROG_ONE_PAGE.to_vec();
            command.extend_from_slice(row);
            self.bus.write(&command).await?;
            progress.report((page * 100 / pages) as u32, "");
            self.settle().await?;
        }
        progress.report(100, "");
        Ok(())
    }

    async fn read_configuration(&mut self, progress: &mut Progress<'_>) -> Result<Vec<u8>, MachXo2Error> {
        self.bus.write(&cmd::INIT_ADDRESS).await?;
        let bus_pages = (self.bus.max_read().saturating_sub(READ_PREAMBLE) / READ_STRIDE)
            .checked_sub(1)
            .filter(|n| *n > 0)
            .ok_or(MachXo2Error::ReadLimit)?;
        let per_request = MAX_PAGES_PER_READ.min(bus_pages);
        let command = [cmd::READ_PAGES, 0, 0, (per_request + 1) as u8];
        let read_len = READ_PREAMBLE + (per_request + 1) * READ_STRIDE;

        let total = self.info.cfg_pages;
        let mut buffer = Vec::with_capacity(total * PAGE_SIZE);
        for first in (0..total).step_by(per_request) {
            let answer = self.bus.transaction(&command, read_len).await?;
            progress.report((first * 100 / total) as u32, "");
            for i in 0..per_request.min(total - first) {
                let start = READ_PREAMBLE + i * READ_STRIDE;
                buffer.extend_from_slice(&answer[start..start + PAGE_SIZE]);
            }
        }
        progress.report(100, "");
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::gige3::jedec::tests::sample_jedec;
    use crate::writer::AccessError;

    /// MachXO2 behind the memory-mapped I2C bridge.
    struct SimulatedXo2 {
        id_codes: Vec<u32>,
        user_code: u32,
        flash: Vec<u8>,
        address: usize,
        staged: Vec<u8>,
        answer: Vec<u8>,
        opcodes: Vec<u8>,
        busy_answers: u32,
        corrupt_readback: bool,
    }

    impl SimulatedXo2 {
        fn new(user_code: u32) -> Self {
            Self {
                id_codes: vec![0x012B_0043],
                user_code,
                flash: vec![0xFF; 575 * PAGE_SIZE],
                address: 0,
                staged: Vec::new(),
                answer: Vec::new(),
                opcodes: Vec::new(),
                busy_answers: 0,
                corrupt_readback: false,
            }
        }

        fn execute(&mut self, command: &[u8], read_len: usize) {
            self.opcodes.push(command[0]);
            let mut answer = vec![0u8; read_len];
            match command[0] {
                0xE0 => {
                    let id = if self.id_codes.len() > 1 {
                        self.id_codes.remove(0)
                    } else {
                        self.id_codes[0]
                    };
                    answer.copy_from_slice(&id.to_be_bytes());
                }
                0xC0 => answer.copy_from_slice(&self.user_code.to_be_bytes()),
                0xF0 if self.busy_answers > 0 => {
                    self.busy_answers -= 1;
                    answer[0] = BUSY_FLAG;
                }
                0x0E => self.flash.fill(0),
                0x46 => self.address = 0,
                0x70 => {
                    let start = self.address * PAGE_SIZE;
                    self.flash[start..start + PAGE_SIZE].copy_from_slice(&command[4..20]);
                    self.address += 1;
                }
                0x73 => {
                    let pages = command[3] as usize - 1;
                    for i in 0..pages {
                        let page = self.address + i;
                        if page * PAGE_SIZE >= self.flash.len() {
                            break;
                        }
                        let at = READ_PREAMBLE + i * READ_STRIDE;
                        answer[at..at + PAGE_SIZE]
                            .copy_from_slice(&self.flash[page * PAGE_SIZE..(page + 1) * PAGE_SIZE]);
                    }
                    if self.corrupt_readback {
                        answer[READ_PREAMBLE] ^= 0x01;
                    }
                    self.address += pages;
                }
                0xC2 => {
                    self.user_code =
                        u32::from_be_bytes([command[4], command[5], command[6], command[7]]);
                }
                _ => {}
            }
            answer.resize(read_len.div_ceil(4) * 4, 0);
            self.answer = answer;
        }
    }

    #[async_trait]
    impl FirmwareWriter for SimulatedXo2 {
        async fn write_u32(&mut self, address: u32, value: u32, _timeout: Option<Duration>) -> Result<(), AccessError> {
            if address != 0xE000_0000 {
                return Err(AccessError::new(address, "unmapped"));
            }
            let read_len = (value >> 16) as usize;
            let write_len = ((value >> 8) & 0xFF) as usize;
            let command = self.staged[..write_len].to_vec();
            self.execute(&command, read_len);
            Ok(())
        }

        async fn write(&mut self, address: u32, data: &[u8], _timeout: Option<Duration>) -> Result<(), AccessError> {
            if address != 0xE000_1000 {
                return Err(AccessError::new(address, "unmapped"));
            }
            self.staged = data.to_vec();
            Ok(())
        }

        async fn read_u32(&mut self, address: u32, _timeout: Option<Duration>) -> Result<u32, AccessError> {
            match address {
                0xE000_0004 => Ok(64),
                0xE000_0008 => Ok(256),
                _ => Err(AccessError::new(address, "unmapped")),
            }
        }

        async fn read(&mut self, address: u32, buf: &mut [u8], _timeout: Option<Duration>) -> Result<usize, AccessError> {
            if address != 0xE000_2000 {
                return Err(AccessError::new(address, "unmapped"));
            }
            buf.copy_from_slice(&self.answer[..buf.len()]);
            Ok(buf.len())
        }
    }

    fn item(text: &str) -> Vec<UploadItem> {
        vec![UploadItem::new(text.as_bytes().to_vec())]
    }

    async fn run(sim: &mut SimulatedXo2, items: &[UploadItem]) -> (Result<Outcome, FirmwareError>, Vec<(u32, String)>) {
        let mut seen = Vec::new();
        let mut sink = |p: u32, label: &str| seen.push((p, label.to_string()));
        let mut progress = Progress::new(&mut sink);
        let result = upload(sim, items, &mut progress, &UpdateConfig::immediate()).await;
        drop(progress);
        (result, seen)
    }

    #[tokio::test]
    async fn matching_user_code_needs_no_action() {
        let mut sim = SimulatedXo2::new(0x1234);
        let (result, seen) = run(&mut sim, &item(&sample_jedec("UH00001234"))).await;
        assert_eq!(result.expect("upload"), Outcome::NoActionRequired);
        assert!(!sim.opcodes.contains(&0x0E));
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn programs_verifies_and_stores_user_code() {
        let mut sim = SimulatedXo2::new(0x1111);
        sim.busy_answers = 3;
        sim.id_codes = vec![0xDEAD_BEEF, 0x012B_8043];
        let text = sample_jedec("UH00002222");
        let (result, seen) = run(&mut sim, &item(&text)).await;
        assert_eq!(result.expect("upload"), Outcome::Success);

        let jedec = JedecFile::parse(text.as_bytes()).expect("parse");
        assert_eq!(sim.flash, jedec.configuration);
        assert_eq!(sim.user_code, 0x2222);
        assert_eq!(sim.opcodes.iter().filter(|&&op| op == 0x0E).count(), 1);
        assert_eq!(sim.opcodes.iter().filter(|&&op| op == 0x79).count(), 2);
        assert_eq!(seen[0], (0, "Writing auxiliary FPGA configuration".to_string()));
        assert!(seen.contains(&(70, "Verifying auxiliary FPGA configuration".to_string())));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last().map(|(p, _)| *p), Some(100));
    }

    #[tokio::test]
    async fn readback_mismatch_fails() {
        let mut sim = SimulatedXo2::new(0);
        sim.corrupt_readback = true;
        let (result, _) = run(&mut sim, &item(&sample_jedec("UH00000001"))).await;
        assert!(matches!(result, Err(FirmwareError::MachXO2UpdateFailed(_))));
        assert_eq!(sim.opcodes.last(), Some(&0xF0));
        assert_eq!(sim.user_code, 0);
    }

    #[tokio::test]
    async fn wrong_density_fails() {
        let mut sim = SimulatedXo2::new(0);
        sim.id_codes = vec![0x012B_A043];
        let (result, _) = run(&mut sim, &item(&sample_jedec("UH00000001"))).await;
        assert!(matches!(result, Err(FirmwareError::MachXO2UpdateFailed(_))));
        assert!(!sim.opcodes.contains(&0x74));
    }

    #[test]
    fn item_checks() {
        let jedec = sample_jedec("UH00000001");
        assert!(check_items(&item(&jedec)).is_ok());
        let mut two = item(&jedec);
        two.extend(item(&jedec));
        assert!(matches!(check_items(&two), Err(FirmwareError::InvalidFile(_))));
        assert!(matches!(check_items(&item("garbage")), Err(FirmwareError::InvalidFile(_))));
    }

    #[test]
    fn id_and_name_lookup_agree() {
        let by_id = DeviceInfo::find_by_id(0x012B_2043).expect("1200");
        let by_name = DeviceInfo::find_by_name("NOTE DEVICE NAME: LCMXO2-1200HC-4TG100C*").expect("1200");
        assert_eq!(by_id, by_name);
        assert_eq!(by_id.cfg_pages, 2175);
        assert!(DeviceInfo::find_by_id(0).is_none());
    }
}
