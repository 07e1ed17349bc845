//! Firmware upload over a GVCP control session.

use std::time::Duration;

use async_trait::async_trait;
use gige_firmware::{
    upgrade_firmware, AccessError, FirmwareError, FirmwareFile, FirmwareWriter, Outcome, Progress,
    UpdateConfig,
};
use tl_gige::{Camera, GigeError, Transport};
use tracing::{info, warn};

/// [`FirmwareWriter`] backed by the memory transactions of a [`Camera`].
pub struct CameraWriter<'a, T: Transport> {
    camera: &'a mut Camera<T>,
}

impl<'a, T: Transport> CameraWriter<'a, T> {
    pub fn new(camera: &'a mut Camera<T>) -> Self {
        Self { camera }
    }
}

fn access_error(address: u32, err: GigeError) -> AccessError {
    AccessError::new(address, err.to_string())
}

#[async_trait]
impl<T: Transport> FirmwareWriter for CameraWriter<'_, T> {
    async fn write_u32(
        &mut self,
        address: u32,
        value: u32,
        timeout: Option<Duration>,
    ) -> Result<(), AccessError> {
        self.write(address, &value.to_be_bytes(), timeout).await
    }

    async fn write(
        &mut self,
        address: u32,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), AccessError> {
        self.camera
            .write_memory_with_timeout(address, data, timeout)
            .await
            .map_err(|err| access_error(address, err))
    }

    async fn read_u32(&mut self, address: u32, timeout: Option<Duration>) -> Result<u32, AccessError> {
        let mut bytes = [0u8; 4];
        self.read(address, &mut bytes, timeout).await?;
        Ok(u32::from_be_bytes(bytes))
    }

    async fn read(
        &mut self,
        address: u32,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, AccessError> {
        self.camera
            .read_memory_into(address, buf, timeout)
            .await
            .map_err(|err| access_error(address, err))?;
        Ok(buf.len())
    }
}

/// Upload `file` to `camera` while holding its control channel.
///
/// Control is released again whatever the upload returned.
pub async fn upload_firmware<T: Transport>(
    camera: &mut Camera<T>,
    file: &FirmwareFile,
    override_model: &str,
    progress: &mut Progress<'_>,
    config: &UpdateConfig,
) -> Result<Outcome, FirmwareError> {
    if let Err(err) = camera.get_control().await {
        warn!(mac = %camera.mac(), %err, "unable to take control for firmware upload");
        return Err(FirmwareError::DeviceAccessFailed(err.to_string()));
    }

    let info = camera.info().clone();
    let result = {
        let mut writer = CameraWriter::new(camera);
        upgrade_firmware(&mut writer, &info, file, override_model, progress, config).await
    };

    if let Err(err) = camera.abandon_control().await {
        // Expected after a reboot.
        info!(mac = %camera.mac(), %err, "control not released");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    use gige_firmware::consts::{FLASH_LOCK, REBOOT_REGISTER};
    use gvcp_codec::{read_mem_ack_body, write_ack_body, Ack, Command, DiscoveryAck, MacAddr, StatusCode};
    use tl_gige::{consts, ControlConfig, NetworkInterface, PacketHandler};

    use super::*;

    /// Flat device memory answering `ReadMem`/`WriteMem`.
    #[derive(Clone, Default)]
    struct BenchDevice {
        memory: Arc<Mutex<HashMap<u32, u8>>>,
        writes: Arc<Mutex<Vec<(u32, usize)>>>,
        refuse_control: bool,
    }

    impl BenchDevice {
        fn word(&self, address: u32) -> u32 {
            let mem = self.memory.lock().unwrap();
            let b = |i| mem.get(&(address + i)).copied().unwrap_or(0);
            u32::from_be_bytes([b(0), b(1), b(2), b(3)])
        }

        fn words_written(&self, address: u32) -> usize {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| *a == address)
                .count()
        }
    }

    #[async_trait]
    impl Transport for BenchDevice {
        async fn send_and_receive(
            &self,
            _destination: Ipv4Addr,
            packet: &[u8],
            on_packet: Option<PacketHandler<'_>>,
            _broadcast: bool,
            _timeout: Option<Duration>,
        ) -> Result<(), GigeError> {
            let (header, command) = Command::decode(packet)?;
            let mut status = StatusCode::Success;
            let payload = match &command {
                Command::ReadMem { address, count } => {
                    let mem = self.memory.lock().unwrap();
                    let data: Vec<u8> = (0..u32::from(*count))
                        .map(|i| mem.get(&(address + i)).copied().unwrap_or(0))
                        .collect();
                    read_mem_ack_body(*address, &data)
                }
                Command::WriteMem { address, data } => {
                    if *address == consts::REG_CONTROL_PRIVILEGE && self.refuse_control {
                        status = StatusCode::AccessDenied;
                    } else {
                        self.writes.lock().unwrap().push((*address, data.len()));
                        let mut mem = self.memory.lock().unwrap();
                        for (i, b) in data.iter().enumerate() {
                            mem.insert(address + i as u32, *b);
                        }
                    }
                    write_ack_body(0)
                }
                _ => write_ack_body(0),
            };
            if let Some(handler) = on_packet {
                let ack = Ack::new(status, command.opcode(), header.request_id, payload);
                handler(&ack.encode());
            }
            Ok(())
        }
    }

    fn camera(device: &BenchDevice, manufacturer_info: &str) -> Camera<BenchDevice> {
        let info = DiscoveryAck {
            mac: MacAddr([0x00, 0x07, 0x48, 0x10, 0x20, 0x30]),
            current_ip: Ipv4Addr::new(192, 168, 1, 20),
            current_subnet: Ipv4Addr::new(255, 255, 255, 0),
            model: "DMK 23G445".into(),
            serial: "27710001".into(),
            manufacturer_info: manufacturer_info.into(),
            ..DiscoveryAck::default()
        };
        let interface = NetworkInterface {
            name: "eth0".into(),
            ip: Ipv4Addr::new(192, 168, 1, 5),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            broadcast: Ipv4Addr::new(192, 168, 1, 255),
        };
        Camera::new(info, interface, device.clone(), ControlConfig::default())
    }

    async fn upload(cam: &mut Camera<BenchDevice>, file: &FirmwareFile) -> Result<Outcome, FirmwareError> {
        let mut sink = |_: u32, _: &str| {};
        let mut progress = Progress::new(&mut sink);
        upload_firmware(cam, file, "", &mut progress, &UpdateConfig::immediate()).await
    }

    #[tokio::test]
    async fn blackfin_image_goes_through_memory_writes() {
        let device = BenchDevice::default();
        let mut cam = camera(&device, "");
        let image = FirmwareFile::from_bytes("cam.fw", vec![0x5A; 0x10000]);

        let outcome = upload(&mut cam, &image).await.expect("upload");
        assert_eq!(outcome, Outcome::DisconnectRequired);
        assert_eq!(device.word(0xEE02_0000), 0x5A5A_5A5A);
        assert_eq!(device.word(0xEE02_FFFC), 0x5A5A_5A5A);
        assert_eq!(device.words_written(FLASH_LOCK), 2);
        assert_eq!(device.word(FLASH_LOCK), 0);
        assert_eq!(device.word(REBOOT_REGISTER), 1 << 2);
        // Released again.
        assert_eq!(device.word(consts::REG_CONTROL_PRIVILEGE), consts::CONTROL_RELEASE);
        assert!(!cam.is_controlled());
    }

    #[tokio::test]
    async fn control_is_released_after_failure() {
        let device = BenchDevice::default();
        let mut cam = camera(&device, "@Type=9@Model=X@");
        let image = FirmwareFile::from_bytes("cam.fw", vec![0; 16]);

        let result = upload(&mut cam, &image).await;
        assert!(matches!(result, Err(FirmwareError::DeviceNotRecognized)));
        assert_eq!(device.words_written(consts::REG_CONTROL_PRIVILEGE), 2);
        assert!(!cam.is_controlled());
    }

    #[tokio::test]
    async fn refused_control_is_access_failure() {
        let device = BenchDevice {
            refuse_control: true,
            ..BenchDevice::default()
        };
        let mut cam = camera(&device, "");
        let image = FirmwareFile::from_bytes("cam.fw", vec![0; 0x10000]);

        let result = upload(&mut cam, &image).await;
        assert!(matches!(result, Err(FirmwareError::DeviceAccessFailed(_))));
        assert!(device.writes.lock().unwrap().is_empty());
    }
}
