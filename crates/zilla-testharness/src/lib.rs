//! ---
//! zl_section: "11-simulation"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Test harness exports."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
//! Instrumented fake transport for driving the link in tests: scripted open
//! outcomes, byte injection, read and write failure injection, and a live
//! handle counter for leak checks.

pub mod fake;
pub mod wait;

pub use fake::{FakeSession, FakeTransportProvider, OpenBehavior};
pub use wait::{wait_for_state, wait_until};
