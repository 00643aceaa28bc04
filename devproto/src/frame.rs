//! Device frame codec.
//!
//! Wire layout:
//!
//! ```text
//! +------+---------+----------------+---------+------------------+
//! | type | version | length (u32BE) | payload | checksum (u64BE) |
//! | 1    | 1       | 4              | length  | 8                |
//! +------+---------+----------------+---------+------------------+
//! ```
//!
//! The checksum field holds the CRC-32 of the payload zero-extended to
//! 64 bits. Terminal firmware expects exactly this width.

use std::io::{ErrorKind, Read};

use crc::{CRC_32_ISO_HDLC, Crc};

use crate::error::{Error, Result};

/// The only protocol version the terminals speak.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Bytes before the payload: type, version, length.
pub const HEADER_LEN: usize = 6;

/// Bytes after the payload.
pub const CHECKSUM_LEN: usize = 8;

/// Largest payload accepted from a terminal.
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// Reflected CRC-32, polynomial 0xEDB88320, init and xorout 0xFFFFFFFF.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Frame message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Data = 0x01,
    Ack = 0x02,
    Nack = 0x03,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MessageType::Data),
            0x02 => Some(MessageType::Ack),
            0x03 => Some(MessageType::Nack),
            _ => None,
        }
    }
}

/// A decoded frame. Only produced when version and checksum are valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFrame {
    pub message_type: MessageType,
    pub protocol_version: u8,
    pub payload: Vec<u8>,
    pub checksum: u32,
}

/// Computes the frame checksum of a payload.
pub fn checksum(payload: &[u8]) -> u32 {
    CRC32.checksum(payload)
}

/// Encodes a frame around `payload`.
pub fn encode(message_type: MessageType, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::FrameTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    buf.push(message_type.as_byte());
    buf.push(PROTOCOL_VERSION);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&u64::from(checksum(payload)).to_be_bytes());
    Ok(buf)
}

/// Reads one complete frame from `r`, then validates it.
///
/// The whole frame is always consumed before validation so the stream stays
/// aligned on the next frame. Version is checked before the checksum.
pub fn decode<R: Read>(r: &mut R) -> Result<DeviceFrame> {
    let mut header = [0u8; HEADER_LEN];
    read_full(r, &mut header)?;

    let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if length > MAX_PAYLOAD_LEN {
        return Err(Error::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    read_full(r, &mut payload)?;

    let mut trailer = [0u8; CHECKSUM_LEN];
    read_full(r, &mut trailer)?;

    let version = header[1];
    if version != PROTOCOL_VERSION {
        return Err(Error::UnsupportedVersion {
            expected: PROTOCOL_VERSION,
            received: version,
        });
    }

    let expected = checksum(&payload);
    let received = u64::from_be_bytes(trailer);
    if received != u64::from(expected) {
        return Err(Error::Integrity { expected, received });
    }

    let message_type =
        MessageType::from_byte(header[0]).ok_or(Error::UnknownMessageType(header[0]))?;

    Ok(DeviceFrame {
        message_type,
        protocol_version: version,
        payload,
        checksum: expected,
    })
}

fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        _ => Error::Io(e),
    })
}
