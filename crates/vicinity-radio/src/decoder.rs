//! Incremental frame decoder.
//!
//! Bytes are appended as they arrive; [`Decoder::poll_frame`] drives a small
//! state machine over the queue and yields one outcome per call. Corruption
//! never stalls the stream: the decoder drops a single byte past the bad
//! magic and rescans.

use bytes::{Buf, BytesMut};
use serde::Serialize;

use crate::error::FrameError;
use crate::frame::{checksum, Frame, FrameType, CHECKSUM_LEN, HEADER_LEN, MAGIC, MAX_PAYLOAD, VERSION};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    SeekMagic,
    ReadHeader,
    ReadBody { payload_len: usize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderStats {
    pub frames_ok: u64,
    pub checksum_failures: u64,
    pub oversize_headers: u64,
    pub version_mismatches: u64,
    pub unknown_types: u64,
    pub bytes_skipped: u64,
}

pub struct Decoder {
    buf: BytesMut,
    state: State,
    stats: DecoderStats,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(2 * (HEADER_LEN + MAX_PAYLOAD + CHECKSUM_LEN)),
            state: State::SeekMagic,
            stats: DecoderStats::default(),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes waiting in the queue.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Advance the state machine.
    ///
    /// `None` means more bytes are needed. `Some(Err(_))` reports a frame that
    /// was dropped; call again to keep decoding.
    pub fn poll_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        loop {
            match self.state {
                State::SeekMagic => {
                    if !self.seek_magic() {
                        return None;
                    }
                    self.state = State::ReadHeader;
                }
                State::ReadHeader => {
                    if self.buf.len() < HEADER_LEN {
                        return None;
                    }
                    let payload_len = usize::from(u16::from_be_bytes([self.buf[6], self.buf[7]]));
                    if payload_len > MAX_PAYLOAD {
                        self.stats.oversize_headers += 1;
                        self.resync();
                        return Some(Err(FrameError::PayloadTooLarge {
                            len: payload_len,
                            max: MAX_PAYLOAD,
                        }));
                    }
                    self.state = State::ReadBody { payload_len };
                }
                State::ReadBody { payload_len } => {
                    let total = HEADER_LEN + payload_len + CHECKSUM_LEN;
                    if self.buf.len() < total {
                        return None;
                    }
                    return Some(self.verify_and_emit(payload_len));
                }
            }
        }
    }

    /// Drop everything before the next magic. Returns whether one was found.
    fn seek_magic(&mut self) -> bool {
        let found = self
            .buf
            .windows(MAGIC.len())
            .position(|w| w == MAGIC);

        match found {
            Some(idx) => {
                self.skip(idx);
                true
            }
            None => {
                // A trailing first magic byte may be completed by the next read.
                let keep = usize::from(self.buf.last() == Some(&MAGIC[0]));
                self.skip(self.buf.len() - keep);
                false
            }
        }
    }

    fn verify_and_emit(&mut self, payload_len: usize) -> Result<Frame, FrameError> {
        let body_end = HEADER_LEN + payload_len;
        let computed = checksum(&self.buf[MAGIC.len()..body_end]);
        let received = u16::from_be_bytes([self.buf[body_end], self.buf[body_end + 1]]);

        if computed != received {
            self.stats.checksum_failures += 1;
            self.resync();
            return Err(FrameError::ChecksumMismatch { computed, received });
        }

        let mut raw = self.buf.split_to(body_end + CHECKSUM_LEN);
        self.state = State::SeekMagic;

        let version = raw[2];
        let type_byte = raw[3];
        let sender = raw[4];
        let recipient = raw[5];

        if version != VERSION {
            self.stats.version_mismatches += 1;
            return Err(FrameError::UnsupportedVersion(version));
        }
        let Some(kind) = FrameType::from_byte(type_byte) else {
            self.stats.unknown_types += 1;
            return Err(FrameError::UnknownType(type_byte));
        };

        raw.advance(HEADER_LEN);
        raw.truncate(payload_len);
        self.stats.frames_ok += 1;

        Ok(Frame {
            kind,
            sender,
            recipient,
            payload: raw.freeze(),
        })
    }

    /// Treat the current magic as spurious.
    fn resync(&mut self) {
        self.skip(1);
        self.state = State::SeekMagic;
    }

    fn skip(&mut self, n: usize) {
        if n > 0 {
            self.buf.advance(n);
            self.stats.bytes_skipped += n as u64;
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
