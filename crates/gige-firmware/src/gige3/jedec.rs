//! JEDEC fuse map files for Lattice MachXO2 parts.

use thiserror::Error;

use super::machxo2::DeviceInfo;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JedecError {
    #[error("no known MachXO2 device named in the file")]
    UnknownDevice,
    #[error("line {line}: fuse row must hold {expected} bits")]
    ShortRow { line: usize, expected: usize },
    #[error("line {line}: invalid character in fuse row")]
    InvalidFuse { line: usize },
    #[error("invalid user code '{0}'")]
    InvalidUserCode(String),
    #[error("expected {expected} configuration pages, found {found}")]
    PageCount { expected: usize, found: usize },
}

/// The parts of a fuse map needed to program a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JedecFile {
    pub device: DeviceInfo,
    pub user_code: u32,
    /// Configuration flash, 16 bytes per page.
    pub configuration: Vec<u8>,
    pub ufm: Vec<u8>,
    pub feature_row: Vec<u8>,
    pub feature_bits: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Row {
    Comment,
    Checksum,
    FuseData,
    EndData,
    FuseList,
    SecurityFuse,
    FuseDefault,
    FuseSize,
    UserCode,
    FeatureRow,
    FeatureBits,
    Done,
}

const ROW_BITS: usize = 128;
const ETX: char = '\x03';

impl JedecFile {
    pub fn parse(data: &[u8]) -> Result<Self, JedecError> {
        let text = String::from_utf8_lossy(data);
        let mut state = Row::Comment;
        let mut device: Option<DeviceInfo> = None;
        let mut pages = 0usize;
        let mut configuration = Vec::new();
        let mut ufm = Vec::new();
        let mut feature_row = Vec::new();
        let mut feature_bits = Vec::new();
        let mut user_code = 0u32;

        for (index, line) in text.split('\n').enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let number = index + 1;

            state = if state == Row::FeatureRow {
                Row::FeatureBits
            } else if line.starts_with(['0', '1']) {
                Row::FuseData
            } else if line.starts_with("NOTE") {
                Row::Comment
            } else if line.starts_with('G') {
                Row::SecurityFuse
            } else if line.starts_with('L') {
                Row::FuseList
            } else if line.starts_with('C') {
                Row::Checksum
            } else if line.starts_with('*') {
                Row::EndData
            } else if line.starts_with('D') {
                Row::FuseDefault
            } else if line.starts_with('U') {
                Row::UserCode
            } else if line.starts_with('E') {
                Row::FeatureRow
            } else if line.starts_with("QF") {
                Row::FuseSize
            } else if line.starts_with(ETX) {
                Row::Done
            } else if line.is_empty() {
                continue;
            } else {
                state
            };

            match state {
                Row::FuseData => {
                    pages += 1;
                    let cfg_pages = device.map_or(0, |d| d.cfg_pages);
                    let target = if pages <= cfg_pages {
                        &mut configuration
                    } else {
                        &mut ufm
                    };
                    parse_fuse_row(line, number, target)?;
                }
                Row::FeatureRow => feature_row = parse_reversed_bits(&line[1..], 8, number)?,
                Row::FeatureBits => feature_bits = parse_reversed_bits(line, 2, number)?,
                Row::UserCode => {
                    let field = &line[1..];
                    user_code = parse_user_code(field.strip_suffix('*').unwrap_or(field))?;
                }
                Row::Comment if line.contains("DEVICE NAME:") => {
                    device = DeviceInfo::find_by_name(line);
                }
                Row::Done => break,
                _ => {}
            }
        }

        let device = device.ok_or(JedecError::UnknownDevice)?;
        let found = configuration.len() / 16;
        if found != device.cfg_pages {
            return Err(JedecError::PageCount {
                expected: device.cfg_pages,
                found,
            });
        }
        Ok(Self {
            device,
            user_code,
            configuration,
            ufm,
            feature_row,
            feature_bits,
        })
    }
}

/// 128 fuse characters, most significant bit first within each byte.
fn parse_fuse_row(line: &str, number: usize, dest: &mut Vec<u8>) -> Result<(), JedecError> {
    let bits = line.as_bytes();
    if bits.len() < ROW_BITS {
        return Err(JedecError::ShortRow {
            line: number,
            expected: ROW_BITS,
        });
    }
    for byte in bits[..ROW_BITS].chunks(8) {
        let mut value = 0u8;
        for &bit in byte {
            value = (value << 1) | fuse_bit(bit, number)?;
        }
        dest.push(value);
    }
    Ok(())
}

/// `len` bytes stored last bit first across the whole row.
fn parse_reversed_bits(line: &str, len: usize, number: usize) -> Result<Vec<u8>, JedecError> {
    let bits = line.as_bytes();
    if bits.len() < 8 * len {
        return Err(JedecError::ShortRow {
            line: number,
            expected: 8 * len,
        });
    }
    let mut result = vec![0u8; len];
    let mut n = 8 * len;
    for value in result.iter_mut() {
        for _ in 0..8 {
            n -= 1;
            *value = (*value << 1) | fuse_bit(bits[n], number)?;
        }
    }
    Ok(result)
}

fn fuse_bit(c: u8, number: usize) -> Result<u8, JedecError> {
    match c {
        b'0' => Ok(0),
        b'1' => Ok(1),
        _ => Err(JedecError::InvalidFuse { line: number }),
    }
}

/// `H` followed by eight hex digits, or up to 32 binary digits.
fn parse_user_code(field: &str) -> Result<u32, JedecError> {
    let invalid = || JedecError::InvalidUserCode(field.to_string());
    if let Some(hex) = field.strip_prefix('H') {
        return u32::from_str_radix(hex.trim(), 16).map_err(|_| invalid());
    }
    let mut value = 0u32;
    for c in field.bytes().take(32) {
        let bit = match c {
            b'0' => 0,
            b'1' => 1,
            _ => return Err(invalid()),
        };
        value = (value << 1) | bit;
    }
    Ok(value)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gige3::machxo2::DeviceKind;

    /// Fuse map for an LCMXO2-256 whose page `n` is filled with byte `n`.
    pub(crate) fn sample_jedec(user_code: &str) -> String {
        let info = DeviceInfo::find_by_name("LCMXO2-256").expect("known device");
        let mut out = String::from("\x02NOTE Diamond generated*\r\nNOTE DEVICE NAME:\tLCMXO2-256HC-4SG32*\r\nQF73600*\r\nG0*\r\nF0*\r\nL000000\r\n");
        for page in 0..info.cfg_pages {
            let byte = page as u8;
            for _ in 0..16 {
                out.push_str(&format!("{byte:08b}"));
            }
            out.push_str("\r\n");
        }
        out.push_str("*\r\n");
        out.push_str("E0000000000000000000000000000000000000000000000000000000000000001\r\n");
        out.push_str("0000010000000000*\r\n");
        out.push_str(&format!("{user_code}*\r\n"));
        out.push_str("C1234*\r\n\x030000\r\n");
        out
    }

    #[test]
    fn parses_device_pages_and_user_code() {
        let jedec = JedecFile::parse(sample_jedec("UH0000ABCD").as_bytes()).expect("parse");
        assert_eq!(jedec.device.kind, DeviceKind::MachXO2_256);
        assert_eq!(jedec.user_code, 0xABCD);
        assert_eq!(jedec.configuration.len(), 575 * 16);
        assert_eq!(&jedec.configuration[16..32], &[1u8; 16]);
        assert!(jedec.ufm.is_empty());
        assert_eq!(jedec.feature_row, vec![0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(jedec.feature_bits, vec![0, 0x20]);
    }

    #[test]
    fn binary_user_code() {
        let jedec = JedecFile::parse(sample_jedec("U00000000000000000000000000000101").as_bytes())
            .expect("parse");
        assert_eq!(jedec.user_code, 5);
    }

    #[test]
    fn rejects_unknown_device_and_bad_rows() {
        let unknown = sample_jedec("UH00000001").replace("LCMXO2-256HC", "LFE5U-25F");
        assert_eq!(
            JedecFile::parse(unknown.as_bytes()),
            Err(JedecError::UnknownDevice)
        );
        let truncated = sample_jedec("UH00000001").replacen("00000000000000000000\r\n", "\r\n", 1);
        assert!(matches!(
            JedecFile::parse(truncated.as_bytes()),
            Err(JedecError::ShortRow { .. })
        ));
        assert!(JedecFile::parse(b"not a fuse map").is_err());
    }
}
