//! awglib-core: Core error definitions and transport contract for awglib.
//!
//! This crate defines the instrument-agnostic pieces that every awglib
//! backend depends on. Applications can hold a shared transport registry
//! without pulling in a specific instrument driver.
//!
//! # Key types
//!
//! - [`Transport`] -- device-keyed datagram channel
//! - [`DeviceId`] -- identity of one device on the transport
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::{DeviceId, Transport};
