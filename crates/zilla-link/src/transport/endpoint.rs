//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Config-backed transport provider for TCP bridges, serial nodes and capture replay."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::fs::File;
use tokio::net::TcpStream;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, info};
use zilla_common::{DeviceConfig, DEFAULT_BAUD_RATE};
use zilla_telemetry::DeviceDescriptor;

use super::{TransportProvider, TransportStreams};
use crate::error::ConnectionError;

/// Where a device is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Serial-over-TCP bridge, `host:port`.
    Tcp(String),
    /// A bound RFCOMM or tty node, opened raw at 8N1 without flow control.
    Serial { path: PathBuf, baud_rate: u32 },
    /// Captured telemetry replayed read-only. Commands are discarded.
    File(PathBuf),
}

impl Endpoint {
    /// Serial node at the default line speed.
    pub fn serial(path: impl Into<PathBuf>) -> Self {
        Endpoint::Serial {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    /// Override the line speed. No effect on non-serial endpoints.
    pub fn with_baud_rate(self, baud_rate: u32) -> Self {
        match self {
            Endpoint::Serial { path, .. } => Endpoint::Serial { path, baud_rate },
            other => other,
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConnectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Some(address) = raw.strip_prefix("tcp://") {
            if address.rsplit_once(':').is_none() {
                return Err(ConnectionError::TransportOpenFailed(format!(
                    "endpoint '{raw}' is missing a port"
                )));
            }
            return Ok(Endpoint::Tcp(address.to_owned()));
        }
        if let Some(path) = raw.strip_prefix("file://") {
            if path.trim().is_empty() {
                return Err(ConnectionError::TransportOpenFailed(format!(
                    "endpoint '{raw}' is missing a path"
                )));
            }
            return Ok(Endpoint::File(PathBuf::from(path)));
        }
        if raw.is_empty() || raw.contains("://") {
            return Err(ConnectionError::TransportOpenFailed(format!(
                "unsupported endpoint '{raw}'"
            )));
        }
        Ok(Endpoint::serial(raw))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(address) => write!(f, "tcp://{address}"),
            Endpoint::Serial { path, baud_rate } => {
                write!(f, "{} @ {baud_rate} baud", path.display())
            }
            Endpoint::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Production provider backed by the `[devices]` table.
#[derive(Debug, Clone, Default)]
pub struct EndpointProvider {
    devices: IndexMap<String, (DeviceDescriptor, Endpoint)>,
}

impl EndpointProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(devices: &IndexMap<String, DeviceConfig>) -> Result<Self, ConnectionError> {
        let mut provider = Self::new();
        for (id, device) in devices {
            let name = device.display_name.clone().unwrap_or_else(|| id.clone());
            let endpoint = device
                .endpoint
                .parse::<Endpoint>()?
                .with_baud_rate(device.baud_rate);
            provider = provider.with_device(id.clone(), name, endpoint);
        }
        Ok(provider)
    }

    pub fn with_device(
        mut self,
        id: impl Into<String>,
        display_name: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        let descriptor = DeviceDescriptor::new(id, display_name);
        self.devices
            .insert(descriptor.id.clone(), (descriptor, endpoint));
        self
    }

    pub fn endpoint(&self, device_id: &str) -> Option<&Endpoint> {
        self.devices.get(device_id).map(|(_, endpoint)| endpoint)
    }
}

#[async_trait]
impl TransportProvider for EndpointProvider {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect()
    }

    async fn open(&self, device: &DeviceDescriptor) -> Result<TransportStreams, ConnectionError> {
        let endpoint = self
            .endpoint(&device.id)
            .ok_or_else(|| ConnectionError::DeviceUnavailable(device.id.clone()))?;
        let target = endpoint.to_string();
        debug!(device = %device.id, endpoint = %target, "opening transport");

        match endpoint {
            Endpoint::Tcp(address) => {
                let stream = TcpStream::connect(address.as_str())
                    .await
                    .map_err(|err| ConnectionError::from_io(&target, &err))?;
                stream
                    .set_nodelay(true)
                    .map_err(|err| ConnectionError::from_io(&target, &err))?;
                let (reader, writer) = stream.into_split();
                Ok(TransportStreams::new(reader, writer))
            }
            Endpoint::Serial { path, baud_rate } => {
                let port = tokio_serial::new(path.to_string_lossy(), *baud_rate)
                    .data_bits(DataBits::Eight)
                    .parity(Parity::None)
                    .stop_bits(StopBits::One)
                    .flow_control(FlowControl::None)
                    .open_native_async()
                    .map_err(|err| ConnectionError::from_io(&target, &io::Error::from(err)))?;
                info!(path = %path.display(), baud_rate, "serial port opened");
                let (reader, writer) = tokio::io::split(port);
                Ok(TransportStreams::new(reader, writer))
            }
            Endpoint::File(path) => {
                let capture = File::open(path)
                    .await
                    .map_err(|err| ConnectionError::from_io(&target, &err))?;
                Ok(TransportStreams::new(capture, tokio::io::sink()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "endpoint"
    }
}
