//! Discovery acknowledgement body and the vendor identity string it carries.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{CodecError, MacAddr};

/// Size of the discovery acknowledgement body.
pub const DISCOVERY_ACK_SIZE: usize = 248;

const MANUFACTURER_LEN: usize = 32;
const MODEL_LEN: usize = 32;
const VERSION_LEN: usize = 32;
const INFO_LEN: usize = 48;
const SERIAL_LEN: usize = 16;
const USER_NAME_LEN: usize = 16;

/// Identity and network state announced by a device in reply to discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAck {
    pub spec_major: u16,
    pub spec_minor: u16,
    pub device_mode: u32,
    pub mac: MacAddr,
    /// Supported IP configuration schemes (same bit layout as `ip_config_current`).
    pub ip_config_options: u32,
    /// Active IP configuration: bit 0 persistent, bit 1 DHCP, bit 2 link-local.
    pub ip_config_current: u32,
    pub current_ip: Ipv4Addr,
    pub current_subnet: Ipv4Addr,
    pub default_gateway: Ipv4Addr,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub manufacturer_info: String,
    pub serial: String,
    pub user_defined_name: String,
}

impl Default for DiscoveryAck {
    fn default() -> Self {
        Self {
            spec_major: 0,
            spec_minor: 0,
            device_mode: 0,
            mac: MacAddr::default(),
            ip_config_options: 0,
            ip_config_current: 0,
            current_ip: Ipv4Addr::UNSPECIFIED,
            current_subnet: Ipv4Addr::UNSPECIFIED,
            default_gateway: Ipv4Addr::UNSPECIFIED,
            manufacturer: String::new(),
            model: String::new(),
            device_version: String::new(),
            manufacturer_info: String::new(),
            serial: String::new(),
            user_defined_name: String::new(),
        }
    }
}

impl DiscoveryAck {
    /// Decode the 248-byte acknowledgement body.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() < DISCOVERY_ACK_SIZE {
            return Err(CodecError::Truncated {
                expected: DISCOVERY_ACK_SIZE,
                actual: payload.len(),
            });
        }
        let mut cursor = payload;
        let spec_major = cursor.get_u16();
        let spec_minor = cursor.get_u16();
        let device_mode = cursor.get_u32();
        cursor.advance(2);
        let mac = MacAddr::get(&mut cursor);
        let ip_config_options = cursor.get_u32();
        let ip_config_current = cursor.get_u32();
        cursor.advance(12);
        let current_ip = Ipv4Addr::from(cursor.get_u32());
        cursor.advance(12);
        let current_subnet = Ipv4Addr::from(cursor.get_u32());
        cursor.advance(12);
        let default_gateway = Ipv4Addr::from(cursor.get_u32());
        Ok(Self {
            spec_major,
            spec_minor,
            device_mode,
            mac,
            ip_config_options,
            ip_config_current,
            current_ip,
            current_subnet,
            default_gateway,
            manufacturer: read_fixed_string(&mut cursor, MANUFACTURER_LEN),
            model: read_fixed_string(&mut cursor, MODEL_LEN),
            device_version: read_fixed_string(&mut cursor, VERSION_LEN),
            manufacturer_info: read_fixed_string(&mut cursor, INFO_LEN),
            serial: read_fixed_string(&mut cursor, SERIAL_LEN),
            user_defined_name: read_fixed_string(&mut cursor, USER_NAME_LEN),
        })
    }

    /// Encode the body (as sent by a device). Over-long strings are truncated.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DISCOVERY_ACK_SIZE);
        buf.put_u16(self.spec_major);
        buf.put_u16(self.spec_minor);
        buf.put_u32(self.device_mode);
        buf.put_u16(0);
        self.mac.put(&mut buf);
        buf.put_u32(self.ip_config_options);
        buf.put_u32(self.ip_config_current);
        buf.put_bytes(0, 12);
        buf.put_u32(u32::from(self.current_ip));
        buf.put_bytes(0, 12);
        buf.put_u32(u32::from(self.current_subnet));
        buf.put_bytes(0, 12);
        buf.put_u32(u32::from(self.default_gateway));
        write_fixed_string(&mut buf, &self.manufacturer, MANUFACTURER_LEN);
        write_fixed_string(&mut buf, &self.model, MODEL_LEN);
        write_fixed_string(&mut buf, &self.device_version, VERSION_LEN);
        write_fixed_string(&mut buf, &self.manufacturer_info, INFO_LEN);
        write_fixed_string(&mut buf, &self.serial, SERIAL_LEN);
        write_fixed_string(&mut buf, &self.user_defined_name, USER_NAME_LEN);
        buf.freeze()
    }
}

fn read_fixed_string(cursor: &mut &[u8], len: usize) -> String {
    let field = &cursor[..len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    let value = String::from_utf8_lossy(&field[..end]).into_owned();
    cursor.advance(len);
    value
}

fn write_fixed_string(buf: &mut BytesMut, value: &str, len: usize) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, len - n);
}

/// Vendor identity carried in the manufacturer-specific information field,
/// formatted as `@Type=<n>@Model=<name>@`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerInfo {
    pub type_id: u32,
    pub model: String,
}

impl ManufacturerInfo {
    /// Parse the identity string.
    ///
    /// An empty string identifies a legacy device (type 0, empty model).
    /// Returns `None` when `Type=` or `Model=` is missing or the type is not
    /// a number.
    pub fn parse(info: &str) -> Option<Self> {
        if info.is_empty() {
            return Some(Self {
                type_id: 0,
                model: String::new(),
            });
        }
        let type_id = field(info, "Type=")?.trim().parse().ok()?;
        let model = field(info, "Model=")?.to_string();
        Some(Self { type_id, model })
    }
}

fn field<'a>(info: &'a str, key: &str) -> Option<&'a str> {
    let start = info.find(key)? + key.len();
    let rest = &info[start..];
    Some(rest.find('@').map_or(rest, |end| &rest[..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DiscoveryAck {
        DiscoveryAck {
            spec_major: 1,
            spec_minor: 2,
            device_mode: 0x8000_0000,
            mac: MacAddr([0x00, 0x07, 0x48, 0x01, 0x02, 0x03]),
            ip_config_options: 0x7,
            ip_config_current: 0x5,
            current_ip: Ipv4Addr::new(192, 168, 0, 42),
            current_subnet: Ipv4Addr::new(255, 255, 255, 0),
            default_gateway: Ipv4Addr::new(192, 168, 0, 1),
            manufacturer: "The Imaging Source Europe GmbH".into(),
            model: "DFK 33GX174".into(),
            device_version: "1.2.3".into(),
            manufacturer_info: "@Type=3@Model=DFK 33GX174@".into(),
            serial: "41910044".into(),
            user_defined_name: "line-cam".into(),
        }
    }

    #[test]
    fn body_is_248_bytes_with_fixed_offsets() {
        let encoded = sample().encode();
        assert_eq!(encoded.len(), DISCOVERY_ACK_SIZE);
        assert_eq!(&encoded[10..16], &[0x00, 0x07, 0x48, 0x01, 0x02, 0x03]);
        assert_eq!(&encoded[36..40], &[192, 168, 0, 42]);
        assert_eq!(&encoded[52..56], &[255, 255, 255, 0]);
        assert_eq!(&encoded[68..72], &[192, 168, 0, 1]);
        assert_eq!(&encoded[72..76], b"The ");
        assert_eq!(&encoded[232..240], b"line-cam");
    }

    #[test]
    fn decode_recovers_fields() {
        let ack = sample();
        let decoded = DiscoveryAck::decode(&ack.encode()).expect("decode");
        assert_eq!(decoded, ack);
    }

    #[test]
    fn unterminated_string_uses_full_width() {
        let mut ack = sample();
        ack.serial = "0123456789ABCDEF".into();
        let decoded = DiscoveryAck::decode(&ack.encode()).expect("decode");
        assert_eq!(decoded.serial, "0123456789ABCDEF");
    }

    #[test]
    fn short_body_rejected() {
        let err = DiscoveryAck::decode(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { actual: 100, .. }));
    }

    #[test]
    fn manufacturer_info_variants() {
        let info = ManufacturerInfo::parse("@Type=1@Model=ICX618 C T@").expect("parse");
        assert_eq!(info.type_id, 1);
        assert_eq!(info.model, "ICX618 C T");

        let legacy = ManufacturerInfo::parse("").expect("legacy");
        assert_eq!(legacy.type_id, 0);
        assert_eq!(legacy.model, "");

        assert!(ManufacturerInfo::parse("@Model=X@").is_none());
        assert!(ManufacturerInfo::parse("@Type=3@").is_none());
        assert!(ManufacturerInfo::parse("@Type=abc@Model=X@").is_none());
    }
}
