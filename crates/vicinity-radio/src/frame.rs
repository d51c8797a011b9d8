//! Radio frame layout.
//!
//! ```text
//! MAGIC(2) | VERSION(1) | TYPE(1) | SENDER(1) | RECIPIENT(1) | LENGTH(2) | PAYLOAD(LENGTH) | CHECKSUM(2)
//! ```
//!
//! Multi-byte fields are big-endian. The checksum is the wrapping sum of
//! every byte from VERSION through the end of PAYLOAD.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

pub const MAGIC: [u8; 2] = [0x56, 0x32];
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 8;
pub const CHECKSUM_LEN: usize = 2;
pub const MAX_PAYLOAD: usize = 1024;

/// Recipient id addressing every station.
pub const BROADCAST_ID: u8 = 0xFF;
/// Never assigned to a station.
pub const UNASSIGNED_ID: u8 = 0x00;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Text = 0x01,
    Emergency = 0x02,
    Reserved = 0x10,
}

impl FrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Text),
            0x02 => Some(Self::Emergency),
            0x10 => Some(Self::Reserved),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    pub sender: u8,
    pub recipient: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn text(sender: u8, recipient: u8, content: &str) -> Self {
        Self {
            kind: FrameType::Text,
            sender,
            recipient,
            payload: Bytes::copy_from_slice(content.as_bytes()),
        }
    }

    /// Emergency frames are always broadcast.
    pub fn emergency(sender: u8, vehicle_info: &str) -> Self {
        Self {
            kind: FrameType::Emergency,
            sender,
            recipient: BROADCAST_ID,
            payload: Bytes::copy_from_slice(vehicle_info.as_bytes()),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient == BROADCAST_ID
    }

    /// Payload as text; invalid UTF-8 is replaced.
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + CHECKSUM_LEN
    }

    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), FrameError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge { len, max: MAX_PAYLOAD });
        }

        let start = buf.len();
        buf.reserve(self.encoded_len());
        buf.put_slice(&MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.sender);
        buf.put_u8(self.recipient);
        buf.put_u16(len as u16);
        buf.put_slice(&self.payload);

        let sum = checksum(&buf[start + MAGIC.len()..]);
        buf.put_u16(sum);
        Ok(())
    }
}

/// Additive checksum, mod 65536.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}
