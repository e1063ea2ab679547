//! ---
//! zl_section: "03-wire-codec"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Outbound command framing."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use crate::error::EncodeError;

/// Frames text commands for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEncoder {
    terminator: String,
    max_len: usize,
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::new("\r\n", 128)
    }
}

impl CommandEncoder {
    /// Encoder appending `terminator` and rejecting commands over `max_len` bytes.
    pub fn new(terminator: impl Into<String>, max_len: usize) -> Self {
        Self {
            terminator: terminator.into(),
            max_len,
        }
    }

    /// Trim trailing line endings, validate, then append the terminator.
    pub fn encode(&self, command: &str) -> Result<Vec<u8>, EncodeError> {
        let trimmed = command.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            return Err(EncodeError::Empty);
        }
        if trimmed.len() > self.max_len {
            return Err(EncodeError::TooLong {
                len: trimmed.len(),
                limit: self.max_len,
            });
        }
        if let Some(position) = trimmed.bytes().position(|b| b.is_ascii_control()) {
            return Err(EncodeError::ControlCharacter { position });
        }

        let mut bytes = Vec::with_capacity(trimmed.len() + self.terminator.len());
        bytes.extend_from_slice(trimmed.as_bytes());
        bytes.extend_from_slice(self.terminator.as_bytes());
        Ok(bytes)
    }

    /// Configured terminator.
    pub fn terminator(&self) -> &str {
        &self.terminator
    }
}
