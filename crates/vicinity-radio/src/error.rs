use std::io;

/// A received frame that had to be discarded.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("checksum mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    ChecksumMismatch { computed: u16, received: u16 },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown frame type 0x{0:02X}")]
    UnknownType(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to open radio device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("radio I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("all {0} radio short ids are in use")]
    ShortIdsExhausted(usize),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
