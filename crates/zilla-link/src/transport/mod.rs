//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Transport provider seam."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use zilla_telemetry::DeviceDescriptor;

use crate::error::ConnectionError;

pub mod endpoint;

pub use endpoint::{Endpoint, EndpointProvider};

/// Read half of an open transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of an open transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Both halves of an open session. Dropping them closes the transport.
pub struct TransportStreams {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl TransportStreams {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl fmt::Debug for TransportStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportStreams").finish_non_exhaustive()
    }
}

/// Device enumeration plus the open capability for a device identifier.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Devices this provider can open.
    fn devices(&self) -> Vec<DeviceDescriptor>;

    /// Map an identifier to its descriptor.
    fn resolve(&self, device_id: &str) -> Result<DeviceDescriptor, ConnectionError> {
        self.devices()
            .into_iter()
            .find(|device| device.id == device_id)
            .ok_or_else(|| ConnectionError::DeviceUnavailable(device_id.to_owned()))
    }

    /// Open a session. Resources acquired before a failure must be released.
    async fn open(&self, device: &DeviceDescriptor) -> Result<TransportStreams, ConnectionError>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}
