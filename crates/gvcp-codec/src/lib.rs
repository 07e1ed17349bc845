//! GVCP: GigE Vision control protocol encode/decode (transport-agnostic).
//!
//! Every integer on the wire is big-endian. Commands start with an 8-byte
//! header (`magic`, `flags`, `command`, `length`, `request_id`) and
//! acknowledgements with an 8-byte header (`status`, `answer`, `length`,
//! `ack_id`).

mod discovery;
mod mac;

use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub use discovery::{DiscoveryAck, ManufacturerInfo, DISCOVERY_ACK_SIZE};
pub use mac::MacAddr;

/// Size of the GVCP command and acknowledgement headers (in bytes).
pub const HEADER_SIZE: usize = 8;
/// First byte of every GVCP command packet.
pub const MAGIC: u8 = 0x42;
/// Size of the Force-IP command body.
pub const FORCE_IP_SIZE: usize = 56;

bitflags! {
    /// Flags that can be set on a GVCP command packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u8 {
        /// Request an acknowledgement for this command.
        const ACK_REQUIRED = 0x01;
        /// Mark the command as a retransmission.
        const RETRY = 0x02;
    }
}

/// GVCP operation codes supported by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Broadcast device discovery.
    Discovery,
    /// Assign a temporary IP configuration by MAC address.
    ForceIp,
    /// Read one or more 32-bit registers.
    ReadReg,
    /// Write one or more 32-bit registers.
    WriteReg,
    /// Read a block of memory from the device.
    ReadMem,
    /// Write a block of memory to the device.
    WriteMem,
}

impl OpCode {
    /// Raw command value as defined by the GigE Vision specification.
    pub const fn command_code(self) -> u16 {
        match self {
            OpCode::Discovery => 0x0002,
            OpCode::ForceIp => 0x0004,
            OpCode::ReadReg => 0x0080,
            OpCode::WriteReg => 0x0082,
            OpCode::ReadMem => 0x0084,
            OpCode::WriteMem => 0x0086,
        }
    }

    /// Raw acknowledgement value; always the command code plus one.
    pub const fn ack_code(self) -> u16 {
        self.command_code() + 1
    }

    pub fn from_command(code: u16) -> Result<Self, CodecError> {
        match code {
            0x0002 => Ok(OpCode::Discovery),
            0x0004 => Ok(OpCode::ForceIp),
            0x0080 => Ok(OpCode::ReadReg),
            0x0082 => Ok(OpCode::WriteReg),
            0x0084 => Ok(OpCode::ReadMem),
            0x0086 => Ok(OpCode::WriteMem),
            _ => Err(CodecError::UnknownOpcode(code)),
        }
    }

    pub fn from_ack(code: u16) -> Result<Self, CodecError> {
        match code.checked_sub(1) {
            Some(cmd) if code & 1 == 1 => Self::from_command(cmd),
            _ => Err(CodecError::UnknownOpcode(code)),
        }
    }
}

/// Status codes returned by GVCP acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Command completed successfully.
    Success,
    /// The requested command is not implemented by the device.
    NotImplemented,
    /// One of the command parameters was invalid.
    InvalidParameter,
    /// The requested address range cannot be accessed.
    InvalidAddress,
    /// The addressed register is read-only.
    WriteProtect,
    /// Address or size not aligned as the device requires.
    BadAlignment,
    /// Another application holds control of the device.
    AccessDenied,
    /// The device was busy processing a previous command.
    Busy,
    NoMessage,
    PacketUnavailable,
    InvalidHeader,
    /// Local pseudo status: the device never answered.
    Timeout,
    /// Generic device failure.
    Failure,
    /// A status code not known to this implementation.
    Unknown(u16),
}

impl StatusCode {
    /// Convert from the raw status field in an acknowledgement header.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x0000 => StatusCode::Success,
            0x8001 => StatusCode::NotImplemented,
            0x8002 => StatusCode::InvalidParameter,
            0x8003 => StatusCode::InvalidAddress,
            0x8004 => StatusCode::WriteProtect,
            0x8005 => StatusCode::BadAlignment,
            0x8006 => StatusCode::AccessDenied,
            0x8007 => StatusCode::Busy,
            0x800B => StatusCode::NoMessage,
            0x800C => StatusCode::PacketUnavailable,
            0x800E => StatusCode::InvalidHeader,
            0x8FFE => StatusCode::Timeout,
            0x8FFF => StatusCode::Failure,
            other => StatusCode::Unknown(other),
        }
    }

    /// Convert to the raw value stored in the packet header.
    pub const fn to_raw(self) -> u16 {
        match self {
            StatusCode::Success => 0x0000,
            StatusCode::NotImplemented => 0x8001,
            StatusCode::InvalidParameter => 0x8002,
            StatusCode::InvalidAddress => 0x8003,
            StatusCode::WriteProtect => 0x8004,
            StatusCode::BadAlignment => 0x8005,
            StatusCode::AccessDenied => 0x8006,
            StatusCode::Busy => 0x8007,
            StatusCode::NoMessage => 0x800B,
            StatusCode::PacketUnavailable => 0x800C,
            StatusCode::InvalidHeader => 0x800E,
            StatusCode::Timeout => 0x8FFE,
            StatusCode::Failure => 0x8FFF,
            StatusCode::Unknown(code) => code,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

/// Errors that can occur when dealing with GVCP packets.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),
    #[error("bad magic byte {0:#04x}")]
    BadMagic(u8),
    #[error("payload truncated: header announces {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("malformed MAC address '{0}'")]
    InvalidMac(String),
}

/// Command header for GVCP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    /// Request flags (ack required, retry).
    pub flags: CommandFlags,
    /// Operation code for the request.
    pub opcode: OpCode,
    /// Length of the payload in bytes.
    pub length: u16,
    /// Request identifier chosen by the client.
    pub request_id: u16,
}

impl CommandHeader {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(MAGIC);
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.opcode.command_code());
        buf.put_u16(self.length);
        buf.put_u16(self.request_id);
    }

    /// Parse a command header, validating the magic byte and opcode.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::InvalidPacket("too short"));
        }
        let mut cursor = buf;
        let magic = cursor.get_u8();
        if magic != MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let flags = CommandFlags::from_bits_truncate(cursor.get_u8());
        let opcode = OpCode::from_command(cursor.get_u16())?;
        let length = cursor.get_u16();
        let request_id = cursor.get_u16();
        Ok(Self {
            flags,
            opcode,
            length,
            request_id,
        })
    }
}

/// Header for GVCP acknowledgements.
///
/// The answer code is kept raw so that unrelated acknowledgements can still
/// be matched (or discarded) by their identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckHeader {
    /// Status returned by the device.
    pub status: StatusCode,
    /// Raw answer code.
    pub answer: u16,
    /// Length of the payload in bytes.
    pub length: u16,
    /// Request identifier that this acknowledgement answers.
    pub ack_id: u16,
}

impl AckHeader {
    /// Parse the fixed header of an acknowledgement.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::InvalidPacket("too short"));
        }
        let mut cursor = buf;
        Ok(Self {
            status: StatusCode::from_raw(cursor.get_u16()),
            answer: cursor.get_u16(),
            length: cursor.get_u16(),
            ack_id: cursor.get_u16(),
        })
    }

    /// Operation answered by this acknowledgement, if known.
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_ack(self.answer).ok()
    }
}

/// GVCP command with its typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Discovery,
    ForceIp {
        mac: MacAddr,
        ip: Ipv4Addr,
        subnet: Ipv4Addr,
        gateway: Ipv4Addr,
    },
    /// Addresses to read.
    ReadReg(Vec<u32>),
    /// `(address, value)` pairs to write.
    WriteReg(Vec<(u32, u32)>),
    ReadMem {
        address: u32,
        count: u16,
    },
    WriteMem {
        address: u32,
        data: Bytes,
    },
}

impl Command {
    pub fn opcode(&self) -> OpCode {
        match self {
            Command::Discovery => OpCode::Discovery,
            Command::ForceIp { .. } => OpCode::ForceIp,
            Command::ReadReg(_) => OpCode::ReadReg,
            Command::WriteReg(_) => OpCode::WriteReg,
            Command::ReadMem { .. } => OpCode::ReadMem,
            Command::WriteMem { .. } => OpCode::WriteMem,
        }
    }

    /// Length of the encoded body in bytes.
    pub fn body_len(&self) -> usize {
        match self {
            Command::Discovery => 0,
            Command::ForceIp { .. } => FORCE_IP_SIZE,
            Command::ReadReg(addrs) => addrs.len() * 4,
            Command::WriteReg(pairs) => pairs.len() * 8,
            Command::ReadMem { .. } => 8,
            Command::WriteMem { data, .. } => 4 + data.len(),
        }
    }

    /// Encode the command into the on-the-wire representation.
    ///
    /// The returned buffer is ready to be transmitted by the transport layer.
    pub fn encode(&self, flags: CommandFlags, request_id: u16) -> Bytes {
        let body_len = self.body_len();
        debug_assert!(body_len <= u16::MAX as usize);
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
        CommandHeader {
            flags,
            opcode: self.opcode(),
            length: body_len as u16,
            request_id,
        }
        .put(&mut buf);
        match self {
            Command::Discovery => {}
            Command::ForceIp {
                mac,
                ip,
                subnet,
                gateway,
            } => {
                buf.put_u16(0);
                mac.put(&mut buf);
                buf.put_bytes(0, 12);
                buf.put_u32(u32::from(*ip));
                buf.put_bytes(0, 12);
                buf.put_u32(u32::from(*subnet));
                buf.put_bytes(0, 12);
                buf.put_u32(u32::from(*gateway));
            }
            Command::ReadReg(addrs) => {
                for addr in addrs {
                    buf.put_u32(*addr);
                }
            }
            Command::WriteReg(pairs) => {
                for (addr, value) in pairs {
                    buf.put_u32(*addr);
                    buf.put_u32(*value);
                }
            }
            Command::ReadMem { address, count } => {
                buf.put_u32(*address);
                buf.put_u16(0);
                buf.put_u16(*count);
            }
            Command::WriteMem { address, data } => {
                buf.put_u32(*address);
                buf.extend_from_slice(data);
            }
        }
        buf.freeze()
    }

    /// Decode a command packet (as seen by a device).
    pub fn decode(buf: &[u8]) -> Result<(CommandHeader, Command), CodecError> {
        let header = CommandHeader::decode(buf)?;
        let body = body_slice(buf, header.length)?;
        let mut cursor = body;
        let command = match header.opcode {
            OpCode::Discovery => Command::Discovery,
            OpCode::ForceIp => {
                if cursor.len() < FORCE_IP_SIZE {
                    return Err(CodecError::InvalidPacket("force ip body too short"));
                }
                cursor.advance(2);
                let mac = MacAddr::get(&mut cursor);
                cursor.advance(12);
                let ip = Ipv4Addr::from(cursor.get_u32());
                cursor.advance(12);
                let subnet = Ipv4Addr::from(cursor.get_u32());
                cursor.advance(12);
                let gateway = Ipv4Addr::from(cursor.get_u32());
                Command::ForceIp {
                    mac,
                    ip,
                    subnet,
                    gateway,
                }
            }
            OpCode::ReadReg => {
                if cursor.len() % 4 != 0 {
                    return Err(CodecError::InvalidPacket("register list misaligned"));
                }
                let mut addrs = Vec::with_capacity(cursor.len() / 4);
                while cursor.has_remaining() {
                    addrs.push(cursor.get_u32());
                }
                Command::ReadReg(addrs)
            }
            OpCode::WriteReg => {
                if cursor.len() % 8 != 0 {
                    return Err(CodecError::InvalidPacket("register pairs misaligned"));
                }
                let mut pairs = Vec::with_capacity(cursor.len() / 8);
                while cursor.has_remaining() {
                    pairs.push((cursor.get_u32(), cursor.get_u32()));
                }
                Command::WriteReg(pairs)
            }
            OpCode::ReadMem => {
                if cursor.len() < 8 {
                    return Err(CodecError::InvalidPacket("read mem body too short"));
                }
                let address = cursor.get_u32();
                cursor.advance(2);
                Command::ReadMem {
                    address,
                    count: cursor.get_u16(),
                }
            }
            OpCode::WriteMem => {
                if cursor.len() < 4 {
                    return Err(CodecError::InvalidPacket("write mem body too short"));
                }
                let address = cursor.get_u32();
                Command::WriteMem {
                    address,
                    data: Bytes::copy_from_slice(cursor),
                }
            }
        };
        Ok((header, command))
    }
}

/// GVCP acknowledgement packet.
#[derive(Debug, Clone)]
pub struct Ack {
    /// Header fields returned by the device.
    pub header: AckHeader,
    /// Payload data (command specific).
    pub payload: Bytes,
}

impl Ack {
    /// Build an acknowledgement answering `opcode`.
    pub fn new(status: StatusCode, opcode: OpCode, ack_id: u16, payload: Bytes) -> Self {
        Self {
            header: AckHeader {
                status,
                answer: opcode.ack_code(),
                length: payload.len() as u16,
                ack_id,
            },
            payload,
        }
    }

    /// Encode the acknowledgement (as sent by a device).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u16(self.header.status.to_raw());
        buf.put_u16(self.header.answer);
        buf.put_u16(self.payload.len() as u16);
        buf.put_u16(self.header.ack_id);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Values returned by a `ReadReg` acknowledgement.
    pub fn register_values(&self) -> Result<Vec<u32>, CodecError> {
        if self.payload.len() % 4 != 0 {
            return Err(CodecError::InvalidPacket("register values misaligned"));
        }
        Ok(self
            .payload
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Index field of a `WriteReg`/`WriteMem` acknowledgement.
    pub fn write_index(&self) -> Result<u16, CodecError> {
        let mut cursor = &self.payload[..];
        if cursor.len() < 4 {
            return Err(CodecError::InvalidPacket("write ack too short"));
        }
        cursor.advance(2);
        Ok(cursor.get_u16())
    }

    /// Address and data of a `ReadMem` acknowledgement.
    pub fn memory(&self) -> Result<(u32, &[u8]), CodecError> {
        if self.payload.len() < 4 {
            return Err(CodecError::InvalidPacket("read mem ack too short"));
        }
        let address = u32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]);
        Ok((address, &self.payload[4..]))
    }

    /// Decode the body of a discovery acknowledgement.
    pub fn discovery(&self) -> Result<DiscoveryAck, CodecError> {
        DiscoveryAck::decode(&self.payload)
    }
}

/// Decode a GVCP acknowledgement from raw bytes.
///
/// Bytes past the announced length are ignored.
pub fn decode_ack(buf: &[u8]) -> Result<Ack, CodecError> {
    let header = AckHeader::decode(buf)?;
    let payload = Bytes::copy_from_slice(body_slice(buf, header.length)?);
    Ok(Ack { header, payload })
}

/// Build the body of a `WriteReg`/`WriteMem` acknowledgement.
pub fn write_ack_body(index: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16(0);
    buf.put_u16(index);
    buf.freeze()
}

/// Build the body of a `ReadMem` acknowledgement.
pub fn read_mem_ack_body(address: u32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u32(address);
    buf.extend_from_slice(data);
    buf.freeze()
}

fn body_slice(buf: &[u8], length: u16) -> Result<&[u8], CodecError> {
    let expected = HEADER_SIZE + length as usize;
    if buf.len() < expected {
        return Err(CodecError::Truncated {
            expected: length as usize,
            actual: buf.len() - HEADER_SIZE,
        });
    }
    Ok(&buf[HEADER_SIZE..expected])
}
