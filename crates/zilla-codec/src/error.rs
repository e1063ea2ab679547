//! ---
//! zl_section: "03-wire-codec"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Codec error types."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---

/// Reasons a frame was discarded. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Content could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Trailing `*HH` checksum did not match the frame body.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the received body.
        expected: u8,
        /// Checksum carried by the frame.
        actual: u8,
    },

    /// Pending bytes exceeded the frame limit before a terminator arrived.
    #[error("frame exceeded {limit} bytes without a terminator")]
    FrameTooLong {
        /// Configured frame limit.
        limit: usize,
    },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::MalformedFrame(reason.into())
    }

    /// True for content errors, false for buffer overflow discards.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, DecodeError::FrameTooLong { .. })
    }
}

/// Reasons an outbound command was rejected before reaching the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// Nothing left after trimming line endings.
    #[error("command is empty")]
    Empty,

    /// Command longer than the configured limit.
    #[error("command is {len} bytes, limit is {limit}")]
    TooLong {
        /// Length of the trimmed command.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Embedded control character (the terminator is appended by the encoder).
    #[error("control character at byte {position}")]
    ControlCharacter {
        /// Byte offset of the offending character.
        position: usize,
    },
}
