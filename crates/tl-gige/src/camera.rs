//! Register and memory client for a discovered device.

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use gvcp_codec::{decode_ack, Ack, Command, CommandFlags, DiscoveryAck, MacAddr, StatusCode};
use tracing::{debug, info, trace, warn};

use crate::gvcp::{consts, ControlConfig, Flow, GigeError, Transport};
use crate::nic::{same_subnet, NetworkInterface};
use crate::socket::UdpTransport;

/// Attribute used to look a device up in a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraIdent {
    Serial,
    /// User defined name.
    Name,
    Mac,
}

/// A device seen by discovery, reachable through `transport`.
pub struct Camera<T = UdpTransport> {
    info: DiscoveryAck,
    interface: NetworkInterface,
    transport: T,
    config: ControlConfig,
    request_id: u16,
    controlled: bool,
    staleness: u32,
}

impl<T: Transport> Camera<T> {
    pub fn new(
        info: DiscoveryAck,
        interface: NetworkInterface,
        transport: T,
        config: ControlConfig,
    ) -> Self {
        let staleness = config.staleness_cycles;
        Self {
            info,
            interface,
            transport,
            config,
            request_id: fastrand::u16(1..),
            controlled: false,
            staleness,
        }
    }

    /// Last discovery record.
    pub fn info(&self) -> &DiscoveryAck {
        &self.info
    }

    pub fn interface(&self) -> &NetworkInterface {
        &self.interface
    }

    pub fn interface_name(&self) -> &str {
        &self.interface.name
    }

    pub fn model_name(&self) -> &str {
        &self.info.model
    }

    pub fn serial_number(&self) -> &str {
        &self.info.serial
    }

    pub fn vendor_name(&self) -> &str {
        &self.info.manufacturer
    }

    pub fn user_defined_name(&self) -> &str {
        &self.info.user_defined_name
    }

    pub fn firmware_version(&self) -> &str {
        &self.info.device_version
    }

    pub fn mac(&self) -> MacAddr {
        self.info.mac
    }

    pub fn current_ip(&self) -> Ipv4Addr {
        self.info.current_ip
    }

    pub fn current_subnet(&self) -> Ipv4Addr {
        self.info.current_subnet
    }

    pub fn current_gateway(&self) -> Ipv4Addr {
        self.info.default_gateway
    }

    /// Whether this handle currently holds the control privilege.
    pub fn is_controlled(&self) -> bool {
        self.controlled
    }

    /// Replace the discovery record with a fresher one.
    pub fn update_from(&mut self, info: DiscoveryAck) {
        self.info = info;
    }

    /// Count one missed discovery cycle; returns the cycles left.
    pub fn reduce_counter(&mut self) -> u32 {
        self.staleness = self.staleness.saturating_sub(1);
        self.staleness
    }

    pub fn reset_counter(&mut self) -> u32 {
        self.staleness = self.config.staleness_cycles;
        self.staleness
    }

    /// `true` when the device's current subnet matches the local interface.
    pub fn is_reachable(&self) -> bool {
        same_subnet(
            self.interface.ip,
            self.interface.netmask,
            self.info.current_ip,
            self.info.current_subnet,
        )
    }

    fn next_request_id(&mut self) -> u16 {
        let id = self.request_id;
        self.request_id = self.request_id.wrapping_add(1);
        if self.request_id == 0 {
            self.request_id = 1;
        }
        id
    }

    /// Send `command` until an acknowledgement with the same request id
    /// arrives or the retries run out.
    async fn transact(
        &mut self,
        command: &Command,
        destination: Ipv4Addr,
        broadcast: bool,
        timeout: Option<Duration>,
    ) -> Result<Ack, GigeError> {
        let request_id = self.next_request_id();
        let opcode = command.opcode();
        let mut flags = CommandFlags::ACK_REQUIRED;
        let mut answer: Option<Ack> = None;
        for attempt in 1..=self.config.retries {
            let packet = command.encode(flags, request_id);
            trace!(request_id, ?opcode, attempt, bytes = packet.len(), "sending GVCP command");
            let mut on_packet = |datagram: &[u8]| match decode_ack(datagram) {
                Ok(ack) if ack.header.ack_id == request_id => {
                    answer = Some(ack);
                    Flow::End
                }
                Ok(ack) => {
                    debug!(request_id, got = ack.header.ack_id, "discarding unrelated acknowledgement");
                    Flow::Continue
                }
                Err(err) => {
                    debug!(request_id, %err, "discarding undecodable datagram");
                    Flow::Continue
                }
            };
            self.transport
                .send_and_receive(destination, &packet, Some(&mut on_packet), broadcast, timeout)
                .await?;
            if answer.is_some() {
                break;
            }
            debug!(request_id, ?opcode, attempt, "no acknowledgement");
            flags |= CommandFlags::RETRY;
        }

        let Some(ack) = answer else {
            warn!(request_id, ?opcode, retries = self.config.retries, "device did not answer");
            return Err(GigeError::Nack(StatusCode::Timeout));
        };
        if !ack.header.status.is_success() {
            debug!(request_id, status = ?ack.header.status, "negative acknowledgement");
            return Err(GigeError::Nack(ack.header.status));
        }
        if ack.header.answer != opcode.ack_code() {
            return Err(GigeError::UnexpectedAnswer {
                expected: opcode.ack_code(),
                got: ack.header.answer,
            });
        }
        Ok(ack)
    }

    async fn unicast(&mut self, command: &Command, timeout: Option<Duration>) -> Result<Ack, GigeError> {
        let destination = self.info.current_ip;
        self.transact(command, destination, false, timeout).await
    }

    /// Read one 32-bit register (`READREG`).
    pub async fn read_register(&mut self, address: u32) -> Result<u32, GigeError> {
        let ack = self.unicast(&Command::ReadReg(vec![address]), None).await?;
        ack.register_values()?
            .first()
            .copied()
            .ok_or(GigeError::Codec(gvcp_codec::CodecError::InvalidPacket(
                "empty register acknowledgement",
            )))
    }

    /// Write one 32-bit register (`WRITEREG`).
    pub async fn write_register(&mut self, address: u32, value: u32) -> Result<(), GigeError> {
        self.unicast(&Command::WriteReg(vec![(address, value)]), None)
            .await?;
        Ok(())
    }

    /// Read `len` bytes of device memory.
    pub async fn read_memory(&mut self, address: u32, len: usize) -> Result<Vec<u8>, GigeError> {
        let mut data = vec![0u8; len];
        self.read_memory_into(address, &mut data, None).await?;
        Ok(data)
    }

    /// Fill `buf` from device memory at `address`.
    ///
    /// The length must be a multiple of 4; transfers are split into
    /// 512-byte requests.
    pub async fn read_memory_into(
        &mut self,
        address: u32,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(), GigeError> {
        if buf.len() % 4 != 0 {
            return Err(GigeError::Misaligned(buf.len()));
        }
        let mut offset = 0usize;
        for chunk in buf.chunks_mut(consts::MAX_BLOCK) {
            let command = Command::ReadMem {
                address: address.wrapping_add(offset as u32),
                count: chunk.len() as u16,
            };
            let ack = self.unicast(&command, timeout).await?;
            let (_, data) = ack.memory()?;
            if data.len() < chunk.len() {
                return Err(GigeError::Codec(gvcp_codec::CodecError::Truncated {
                    expected: chunk.len(),
                    actual: data.len(),
                }));
            }
            chunk.copy_from_slice(&data[..chunk.len()]);
            offset += chunk.len();
        }
        Ok(())
    }

    /// Write `data` to device memory at `address`.
    pub async fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), GigeError> {
        self.write_memory_with_timeout(address, data, None).await
    }

    /// Like [`Camera::write_memory`] with a per-receive timeout override.
    pub async fn write_memory_with_timeout(
        &mut self,
        address: u32,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), GigeError> {
        if data.len() % 4 != 0 {
            return Err(GigeError::Misaligned(data.len()));
        }
        for (index, chunk) in data.chunks(consts::MAX_BLOCK).enumerate() {
            let command = Command::WriteMem {
                address: address.wrapping_add((index * consts::MAX_BLOCK) as u32),
                data: Bytes::copy_from_slice(chunk),
            };
            self.unicast(&command, timeout).await?;
        }
        Ok(())
    }

    async fn read_u32(&mut self, address: u32) -> Result<u32, GigeError> {
        let mut bytes = [0u8; 4];
        self.read_memory_into(address, &mut bytes, None).await?;
        Ok(u32::from_be_bytes(bytes))
    }

    async fn write_u32(&mut self, address: u32, value: u32) -> Result<(), GigeError> {
        self.write_memory(address, &value.to_be_bytes()).await
    }

    /// Acquire exclusive control; succeeds immediately when already held.
    pub async fn get_control(&mut self) -> Result<(), GigeError> {
        if self.controlled {
            return Ok(());
        }
        self.write_u32(consts::REG_CONTROL_PRIVILEGE, consts::CONTROL_ACQUIRE)
            .await?;
        self.controlled = true;
        debug!(mac = %self.info.mac, "acquired control");
        Ok(())
    }

    /// Release control.
    pub async fn abandon_control(&mut self) -> Result<(), GigeError> {
        self.write_u32(consts::REG_CONTROL_PRIVILEGE, consts::CONTROL_RELEASE)
            .await?;
        self.controlled = false;
        debug!(mac = %self.info.mac, "released control");
        Ok(())
    }

    /// `true` when another application holds control of the device.
    pub async fn is_busy(&mut self) -> Result<bool, GigeError> {
        if self.controlled {
            return Ok(false);
        }
        match self.get_control().await {
            Ok(()) => {
                self.release_after(Ok(())).await?;
                Ok(false)
            }
            Err(GigeError::Nack(status)) => {
                debug!(mac = %self.info.mac, ?status, "control refused");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// Release control, keeping `result` as the overall outcome.
    async fn release_after<R>(&mut self, result: Result<R, GigeError>) -> Result<R, GigeError> {
        if let Err(err) = self.abandon_control().await {
            warn!(mac = %self.info.mac, %err, "failed to release control");
        }
        result
    }

    async fn write_u32_controlled(&mut self, address: u32, value: u32) -> Result<(), GigeError> {
        self.get_control().await?;
        let result = self.write_u32(address, value).await;
        self.release_after(result).await
    }

    /// `true` when the persistent (static) IP scheme is active.
    pub async fn is_static_ip_active(&mut self) -> Result<bool, GigeError> {
        Ok(self.read_u32(consts::REG_CURRENT_IP_CONFIG).await? & consts::IP_CONFIG_STATIC != 0)
    }

    pub async fn is_dhcp_active(&mut self) -> Result<bool, GigeError> {
        Ok(self.read_u32(consts::REG_CURRENT_IP_CONFIG).await? & consts::IP_CONFIG_DHCP != 0)
    }

    /// Select the IP configuration schemes; link-local stays enabled.
    pub async fn set_ip_config_state(&mut self, dhcp: bool, static_ip: bool) -> Result<(), GigeError> {
        let mut value = self.info.ip_config_current | consts::IP_CONFIG_LLA;
        set_bit(&mut value, consts::IP_CONFIG_DHCP, dhcp);
        set_bit(&mut value, consts::IP_CONFIG_STATIC, static_ip);
        info!(mac = %self.info.mac, dhcp, static_ip, "updating IP configuration");
        self.write_u32_controlled(consts::REG_CURRENT_IP_CONFIG, value)
            .await?;
        self.info.ip_config_current = value;
        Ok(())
    }

    /// Toggle the static IP scheme, keeping the device's DHCP state.
    pub async fn set_static_ip_state(&mut self, on: bool) -> Result<(), GigeError> {
        let dhcp = self.is_dhcp_active().await?;
        self.set_ip_config_state(dhcp, on).await
    }

    /// Toggle DHCP, keeping the device's static IP state.
    pub async fn set_dhcp_state(&mut self, on: bool) -> Result<(), GigeError> {
        let static_ip = self.is_static_ip_active().await?;
        self.set_ip_config_state(on, static_ip).await
    }

    pub async fn persistent_ip(&mut self) -> Result<Ipv4Addr, GigeError> {
        Ok(Ipv4Addr::from(self.read_u32(consts::REG_PERSISTENT_IP).await?))
    }

    pub async fn set_persistent_ip(&mut self, ip: Ipv4Addr) -> Result<(), GigeError> {
        self.write_u32_controlled(consts::REG_PERSISTENT_IP, ip.into())
            .await
    }

    pub async fn persistent_subnet(&mut self) -> Result<Ipv4Addr, GigeError> {
        Ok(Ipv4Addr::from(
            self.read_u32(consts::REG_PERSISTENT_SUBNET).await?,
        ))
    }

    pub async fn set_persistent_subnet(&mut self, subnet: Ipv4Addr) -> Result<(), GigeError> {
        self.write_u32_controlled(consts::REG_PERSISTENT_SUBNET, subnet.into())
            .await
    }

    pub async fn persistent_gateway(&mut self) -> Result<Ipv4Addr, GigeError> {
        Ok(Ipv4Addr::from(
            self.read_u32(consts::REG_PERSISTENT_GATEWAY).await?,
        ))
    }

    pub async fn set_persistent_gateway(&mut self, gateway: Ipv4Addr) -> Result<(), GigeError> {
        self.write_u32_controlled(consts::REG_PERSISTENT_GATEWAY, gateway.into())
            .await
    }

    /// Store a user defined name; at most 15 bytes are kept.
    pub async fn set_user_defined_name(&mut self, name: &str) -> Result<(), GigeError> {
        let mut buf = [0u8; consts::USER_NAME_LEN];
        let kept = truncate_utf8(name, consts::USER_NAME_LEN - 1);
        buf[..kept.len()].copy_from_slice(kept.as_bytes());
        self.get_control().await?;
        let result = self.write_memory(consts::REG_USER_DEFINED_NAME, &buf).await;
        self.release_after(result).await?;
        self.info.user_defined_name = kept.to_string();
        Ok(())
    }

    /// Assign a temporary IP configuration by MAC address.
    ///
    /// The all-zero triple asks the device to restart its normal IP
    /// configuration; it never answers that, so the request is sent once and
    /// reported as successful.
    ///
    /// Any other triple waits for the acknowledgement. A timeout only means no
    /// answer arrived: the device may still have taken the address, so callers
    /// should rediscover before retrying. The cached record is updated only on
    /// an acknowledgement.
    pub async fn force_ip(
        &mut self,
        ip: Ipv4Addr,
        subnet: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> Result<(), GigeError> {
        let command = Command::ForceIp {
            mac: self.info.mac,
            ip,
            subnet,
            gateway,
        };
        info!(mac = %self.info.mac, %ip, %subnet, %gateway, iface = %self.interface.name, "forcing IP");
        if ip.is_unspecified() && subnet.is_unspecified() && gateway.is_unspecified() {
            let packet = command.encode(CommandFlags::ACK_REQUIRED, self.next_request_id());
            self.transport
                .send_and_receive(consts::BROADCAST, &packet, None, true, None)
                .await?;
            return Ok(());
        }
        self.transact(&command, consts::BROADCAST, true, None).await?;
        self.info.current_ip = ip;
        self.info.current_subnet = subnet;
        self.info.default_gateway = gateway;
        Ok(())
    }

    /// Drop control and let the device re-run its IP configuration.
    pub async fn reset_ip(&mut self) -> Result<(), GigeError> {
        if let Err(err) = self.abandon_control().await {
            debug!(%err, "release before IP reset failed");
        }
        self.force_ip(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        )
        .await
    }
}

fn set_bit(value: &mut u32, bit: u32, on: bool) {
    if on {
        *value |= bit;
    } else {
        *value &= !bit;
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Find a device by serial number, user defined name or MAC.
pub fn find_camera<'a, T: Transport>(
    cameras: &'a [Camera<T>],
    identifier: &str,
    ident: CameraIdent,
) -> Option<&'a Camera<T>> {
    let mac = match ident {
        CameraIdent::Mac => Some(identifier.parse::<MacAddr>().ok()?),
        _ => None,
    };
    cameras.iter().find(|cam| match ident {
        CameraIdent::Serial => cam.serial_number() == identifier,
        CameraIdent::Name => cam.user_defined_name() == identifier,
        CameraIdent::Mac => Some(cam.mac()) == mac,
    })
}
