//! Transport implementations for awglib.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](awglib_core::Transport) contract from `awglib-core`:
//!
//! - [`UdpTransport`]: a registry of per-device UDP links, used by the
//!   APS2 driver's point-to-point network protocol
//!
//! # Example
//!
//! ```no_run
//! use awglib_core::{DeviceId, Transport};
//! use awglib_transport::UdpTransport;
//! use bytes::Bytes;
//!
//! # async fn example() -> awglib_core::Result<()> {
//! let transport = UdpTransport::new();
//! let device = DeviceId::from("192.168.2.2");
//! transport.connect(&device).await?;
//! // Request and reply as one exchange; the link stays locked in between.
//! let replies = transport
//!     .exchange(&device, &[Bytes::from_static(&[0u8; 10])], 1)
//!     .await?;
//! assert_eq!(replies.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod udp;

pub use udp::{DEFAULT_DEVICE_PORT, DEFAULT_TIMEOUT, UdpTransport};
