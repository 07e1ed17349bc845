use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};

use crate::CodecError;

/// 48-bit hardware address; the identity key of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Integer form used by the registers (upper 16 bits always zero).
    pub fn to_u64(self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }

    pub fn from_u64(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[2..]);
        Self(mac)
    }

    pub fn octets(self) -> [u8; 6] {
        self.0
    }

    pub(crate) fn put(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }

    /// Read the `high u16` + `low u32` wire layout.
    pub(crate) fn get(buf: &mut impl Buf) -> Self {
        let mut mac = [0u8; 6];
        buf.copy_to_slice(&mut mac);
        Self(mac)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Parses the `XX:XX:XX:XX:XX:XX` form; hex digits in either case.
impl FromStr for MacAddr {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidMac(s.to_string());
        let bytes = s.as_bytes();
        if bytes.len() != 17 {
            return Err(invalid());
        }
        let mut mac = [0u8; 6];
        for (i, slot) in mac.iter_mut().enumerate() {
            let pos = i * 3;
            let hi = hex_digit(bytes[pos]).ok_or_else(invalid)?;
            let lo = hex_digit(bytes[pos + 1]).ok_or_else(invalid)?;
            *slot = (hi << 4) | lo;
            if i < 5 && bytes[pos + 2] != b':' {
                return Err(invalid());
            }
        }
        Ok(Self(mac))
    }
}

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}
