//! ---
//! zl_section: "02-telemetry-model"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Device identity supplied by the discovery collaborator."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity of a controller interface, e.g. a Bluetooth address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Identifier passed to `connect`.
    pub id: String,
    /// Human readable label.
    pub display_name: String,
}

impl DeviceDescriptor {
    /// Build a descriptor from an id and label.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}
