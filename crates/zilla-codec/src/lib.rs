//! ---
//! zl_section: "03-wire-codec"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Wire codec module exports."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
//! Byte-level codec for the controller serial link.
//!
//! Inbound telemetry is newline-delimited ASCII made of `KEY=VALUE` tokens with
//! an optional `*HH` XOR checksum, for example:
//!
//! ```text
//! BV=120.4,BA=51.2,MV=118.0,MA=40.5,RPM=2010,ST=RUNNING,AP=0.42*30
//! ```
//!
//! [`StreamDecoder`] buffers partial lines across reads and turns each complete
//! line into a [`zilla_telemetry::MetricsDelta`] or a discard event. Outbound
//! commands are plain text framed by [`CommandEncoder`].
#![warn(missing_docs)]

pub mod command;
pub mod decoder;
pub mod error;
pub mod frame;

pub use command::CommandEncoder;
pub use decoder::{DecodeEvent, DecoderStats, StreamDecoder, DEFAULT_MAX_FRAME_LEN};
pub use error::{DecodeError, EncodeError};
pub use frame::{checksum, encode_frame, parse_frame};
