//! Aps2Builder -- fluent builder for constructing [`Aps2`] sessions.
//!
//! Separates configuration from construction so that callers can set the
//! device address, command timeout and clock synchronization bounds before
//! the session is opened.
//!
//! # Example
//!
//! ```no_run
//! use awglib_aps2::builder::Aps2Builder;
//! use std::time::Duration;
//!
//! # async fn example() -> awglib_core::Result<()> {
//! let mut aps = Aps2Builder::new("192.168.2.2")
//!     .command_timeout(Duration::from_millis(500))
//!     .sync_retries(4)
//!     .build()
//!     .await?;
//! aps.init(false).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use awglib_core::{DeviceId, Error, Result, Transport};
use awglib_transport::{DEFAULT_TIMEOUT, UdpTransport};

use crate::device::Aps2;
use crate::pll::SyncConfig;

/// Fluent builder for [`Aps2`].
pub struct Aps2Builder {
    device: DeviceId,
    command_timeout: Duration,
    sync: SyncConfig,
    connect_on_build: bool,
}

impl Aps2Builder {
    /// Create a builder for the device at `device` (`host` or `host:port`).
    pub fn new(device: impl Into<DeviceId>) -> Self {
        Aps2Builder {
            device: device.into(),
            command_timeout: DEFAULT_TIMEOUT,
            sync: SyncConfig::default(),
            connect_on_build: true,
        }
    }

    /// Set how long to wait for each reply (default: 1s).
    ///
    /// Only used by [`build()`](Self::build); a transport passed to
    /// [`build_with_transport()`](Self::build_with_transport) keeps its own
    /// timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set how many times a failed clock synchronization is retried
    /// (default: 2).
    pub fn sync_retries(mut self, retries: u32) -> Self {
        self.sync.retries = retries;
        self
    }

    /// Set how many PLL status polls a lock wait makes (default: 20).
    pub fn lock_poll_limit(mut self, polls: u32) -> Self {
        self.sync.lock_poll_limit = polls;
        self
    }

    /// Set the delay between PLL status polls (default: 1ms).
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.sync.lock_poll_interval = interval;
        self
    }

    /// Open the device's link as part of building (default: true).
    pub fn connect_on_build(mut self, enabled: bool) -> Self {
        self.connect_on_build = enabled;
        self
    }

    /// Build an [`Aps2`] over a caller-provided transport.
    ///
    /// This is the entry point for sharing one transport registry between
    /// several devices, and for tests (pass a `MockTransport` from
    /// `awglib-test-harness`).
    pub async fn build_with_transport(self, transport: Arc<dyn Transport>) -> Result<Aps2> {
        if self.device.as_str().is_empty() {
            return Err(Error::InvalidParameter("device address is required".into()));
        }
        if self.sync.lock_poll_limit == 0 {
            return Err(Error::InvalidParameter(
                "lock_poll_limit must be at least 1".into(),
            ));
        }

        let mut aps = Aps2::new(transport, self.device, self.sync);
        if self.connect_on_build {
            aps.connect().await?;
        }
        Ok(aps)
    }

    /// Build an [`Aps2`] over a new [`UdpTransport`].
    pub async fn build(self) -> Result<Aps2> {
        if self.command_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "command_timeout must be non-zero".into(),
            ));
        }
        let transport = UdpTransport::new().with_timeout(self.command_timeout);
        self.build_with_transport(Arc::new(transport)).await
    }
}
