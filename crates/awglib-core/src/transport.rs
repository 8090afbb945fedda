//! Transport abstraction for instrument communication.
//!
//! The [`Transport`] trait is a registry of logical connections keyed by
//! [`DeviceId`]. It moves whole datagrams: one encoded packet per
//! datagram. Protocol engines (packet codecs, query discipline) live in
//! the backend crates and sit on top of this contract.
//!
//! Implementations must serialize traffic per device identity while
//! keeping different identities independent, so a single registry can be
//! shared (`Arc<dyn Transport>`) between sessions for several devices.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Identity of one device on the transport (e.g. `"192.168.2.2"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        DeviceId(s)
    }
}

/// Datagram-level communication channel to a set of devices.
///
/// All methods are keyed by device identity. Using an identity that has
/// not been connected yields [`Error::NotConnected`](crate::Error::NotConnected).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a logical connection to `device`. Connecting twice is a no-op.
    async fn connect(&self, device: &DeviceId) -> Result<()>;

    /// Close the logical connection to `device`.
    async fn disconnect(&self, device: &DeviceId) -> Result<()>;

    /// Send datagrams to `device` in order.
    ///
    /// When `ack_every` is non-zero the datagrams are sent in groups of
    /// that size and the transport consumes one acknowledgement per
    /// datagram before starting the next group. With `ack_every == 0` no
    /// replies are consumed.
    async fn send(&self, device: &DeviceId, datagrams: &[Bytes], ack_every: usize) -> Result<()>;

    /// Receive exactly `count` datagrams from `device`, in arrival order.
    ///
    /// Fails with [`Error::Timeout`](crate::Error::Timeout) if they do not
    /// all arrive within the transport's timeout.
    async fn receive(&self, device: &DeviceId, count: usize) -> Result<Vec<Bytes>>;

    /// Send `datagrams` to `device`, then receive exactly `replies`
    /// datagrams, as one uninterrupted exchange.
    ///
    /// No other call for the same identity may send or receive between the
    /// first datagram and the last reply. Stop-and-wait engines use this
    /// so replies always pair with their requests, even when several
    /// sessions share one registry.
    async fn exchange(
        &self,
        device: &DeviceId,
        datagrams: &[Bytes],
        replies: usize,
    ) -> Result<Vec<Bytes>>;

    /// Return `true` if a logical connection to `device` is open.
    fn is_connected(&self, device: &DeviceId) -> bool;
}
