//! Test harness for awglib protocol engines.
//!
//! Provides [`MockTransport`] for deterministic, hardware-free testing of
//! packet encoding, query discipline and reply parsing. Scripted
//! expectations cover exact traffic checks; a responder closure lets a
//! test stand up a simulated device.

pub mod mock_transport;

pub use mock_transport::{MockTransport, Responder};
