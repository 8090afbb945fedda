//! # awglib -- Control-Plane Drivers for Arbitrary Waveform Generators
//!
//! `awglib` is an asynchronous Rust library for bringing up and driving
//! network-attached arbitrary waveform generators: programming firmware and
//! boot tables, calibrating DAC timing, synchronizing channel clocks, and
//! loading waveforms and playback sequences.
//!
//! ## Quick Start
//!
//! Add `awglib` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! awglib = { version = "0.1", features = ["aps2"] }
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Connect to an APS2, bring it up and play a waveform:
//!
//! ```no_run
//! use awglib::aps2::{Aps2Builder, TriggerSource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut aps = Aps2Builder::new("192.168.2.2").build().await?;
//!     aps.init(false).await?;
//!
//!     let ramp: Vec<f32> = (0..1200).map(|i| i as f32 / 1200.0).collect();
//!     aps.set_waveform(0, &ramp).await?;
//!     aps.set_channel_enabled(0, true).await?;
//!     aps.set_trigger_source(TriggerSource::Internal).await?;
//!     aps.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                 | Purpose                                         |
//! |-----------------------|-------------------------------------------------|
//! | `awglib-core`         | [`Transport`] contract, [`DeviceId`], errors    |
//! | `awglib-transport`    | UDP transport registry                          |
//! | `awglib-aps2`         | APS2 packet protocol, calibration, device session |
//! | **`awglib`**          | This facade crate -- re-exports everything      |
//!
//! Every driver talks to its hardware through a shared [`Transport`], keyed
//! by [`DeviceId`]. One transport can serve many devices; exchanges with
//! different devices never block each other.
//!
//! ## Feature Flags
//!
//! | Feature | Enables                            | Default |
//! |---------|------------------------------------|---------|
//! | `aps2`  | [`aps2`] module (APS2 protocol)    | yes     |
//!
//! ## Errors
//!
//! All operations return [`Result`]. Transport failures (including
//! [`Error::Timeout`]) are reported as such and never retried silently;
//! see [`Error::is_transport`].

pub use awglib_core::*;

/// APS2 protocol backend.
///
/// Provides [`Aps2`](aps2::Aps2) and [`Aps2Builder`](aps2::Aps2Builder) for
/// driving APS2 waveform generators over their UDP packet protocol.
#[cfg(feature = "aps2")]
pub mod aps2 {
    pub use awglib_aps2::*;
}

/// UDP transport.
pub mod transport {
    pub use awglib_transport::*;
}
