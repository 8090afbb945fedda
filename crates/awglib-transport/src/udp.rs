//! UDP transport registry for instrument communication.
//!
//! [`UdpTransport`] implements the [`Transport`] contract over UDP: each
//! connected [`DeviceId`] gets its own socket, connected to the device's
//! address so datagrams from other hosts are filtered by the OS. One
//! registry can be shared by sessions for many devices.
//!
//! Device identities are `host` or `host:port` strings. When no port is
//! given, [`DEFAULT_DEVICE_PORT`] is used.
//!
//! # Example
//!
//! ```no_run
//! use awglib_core::{DeviceId, Transport};
//! use awglib_transport::UdpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> awglib_core::Result<()> {
//! let transport = UdpTransport::new().with_timeout(Duration::from_millis(500));
//! let device = DeviceId::from("192.168.2.2");
//! transport.connect(&device).await?;
//! assert!(transport.is_connected(&device));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;

use awglib_core::error::{Error, Result};
use awglib_core::transport::{DeviceId, Transport};

/// UDP port the instrument firmware listens on.
pub const DEFAULT_DEVICE_PORT: u16 = 47950;

/// Default time to wait for each reply datagram.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Receive buffer size; comfortably above the largest reply the device sends.
const MAX_DATAGRAM: usize = 2048;

/// One open logical connection.
#[derive(Debug)]
struct Link {
    socket: UdpSocket,
    remote: SocketAddr,
}

/// Registry of UDP links keyed by device identity.
///
/// Each link sits behind its own async mutex, so traffic to one device
/// never waits on another device while calls for the same identity are
/// serialized. [`Transport::exchange`] holds that mutex from the first
/// datagram sent until the last reply is read.
#[derive(Debug)]
pub struct UdpTransport {
    links: Mutex<HashMap<DeviceId, Arc<tokio::sync::Mutex<Link>>>>,
    timeout: Duration,
    default_port: u16,
}

impl UdpTransport {
    /// Create an empty registry with the default timeout and device port.
    pub fn new() -> Self {
        UdpTransport {
            links: Mutex::new(HashMap::new()),
            timeout: DEFAULT_TIMEOUT,
            default_port: DEFAULT_DEVICE_PORT,
        }
    }

    /// Set the time to wait for each reply datagram (default: 1s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the port used for identities that do not carry one.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Return the per-reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn links(&self) -> MutexGuard<'_, HashMap<DeviceId, Arc<tokio::sync::Mutex<Link>>>> {
        self.links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn link(&self, device: &DeviceId) -> Result<Arc<tokio::sync::Mutex<Link>>> {
        self.links().get(device).cloned().ok_or(Error::NotConnected)
    }

    async fn resolve(&self, device: &DeviceId) -> Result<SocketAddr> {
        let id = device.as_str();
        if let Ok(addr) = id.parse::<SocketAddr>() {
            return Ok(addr);
        }
        if let Ok(ip) = id.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.default_port));
        }
        let target = if id.contains(':') {
            id.to_string()
        } else {
            format!("{}:{}", id, self.default_port)
        };
        let mut addrs = tokio::net::lookup_host(&target).await.map_err(|e| {
            tracing::error!(device = %device, error = %e, "Failed to resolve device address");
            Error::Transport(format!("cannot resolve {target}: {e}"))
        })?;
        addrs
            .next()
            .ok_or_else(|| Error::Transport(format!("no address for {target}")))
    }

    async fn recv_one(&self, link: &Link, device: &DeviceId) -> Result<Bytes> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match tokio::time::timeout(self.timeout, link.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(device = %device, remote = %link.remote, bytes = n, "Received datagram");
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Ok(Err(e)) => {
                tracing::error!(device = %device, error = %e, "Failed to receive datagram");
                Err(Error::Io(e))
            }
            Err(_) => {
                tracing::debug!(
                    device = %device,
                    timeout_ms = self.timeout.as_millis(),
                    "Timeout waiting for datagram"
                );
                Err(Error::Timeout)
            }
        }
    }

    async fn recv_many(&self, link: &Link, device: &DeviceId, count: usize) -> Result<Vec<Bytes>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.recv_one(link, device).await?);
        }
        Ok(out)
    }

    async fn send_on(
        &self,
        link: &Link,
        device: &DeviceId,
        datagrams: &[Bytes],
        ack_every: usize,
    ) -> Result<()> {
        let group = if ack_every == 0 { datagrams.len().max(1) } else { ack_every };

        for chunk in datagrams.chunks(group) {
            for datagram in chunk {
                link.socket.send(datagram).await.map_err(|e| {
                    tracing::error!(device = %device, error = %e, "Failed to send datagram");
                    Error::Io(e)
                })?;
                tracing::trace!(device = %device, bytes = datagram.len(), "Datagram sent");
            }
            if ack_every > 0 {
                for _ in chunk {
                    self.recv_one(link, device).await?;
                }
            }
        }
        Ok(())
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&self, device: &DeviceId) -> Result<()> {
        if self.is_connected(device) {
            return Ok(());
        }
        let remote = self.resolve(device).await?;
        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        tracing::debug!(device = %device, remote = %remote, "Opening UDP link");
        let socket = UdpSocket::bind(local).await.map_err(|e| {
            tracing::error!(device = %device, error = %e, "Failed to bind UDP socket");
            Error::Io(e)
        })?;
        socket.connect(remote).await.map_err(|e| {
            tracing::error!(device = %device, remote = %remote, error = %e, "Failed to connect UDP socket");
            Error::Io(e)
        })?;

        self.links()
            .entry(device.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Link { socket, remote })));
        tracing::info!(device = %device, remote = %remote, "Connected");
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        match self.links().remove(device) {
            Some(_) => {
                tracing::info!(device = %device, "Disconnected");
                Ok(())
            }
            None => Err(Error::NotConnected),
        }
    }

    async fn send(&self, device: &DeviceId, datagrams: &[Bytes], ack_every: usize) -> Result<()> {
        let link = self.link(device)?;
        let link = link.lock().await;
        self.send_on(&link, device, datagrams, ack_every).await
    }

    async fn receive(&self, device: &DeviceId, count: usize) -> Result<Vec<Bytes>> {
        let link = self.link(device)?;
        let link = link.lock().await;
        self.recv_many(&link, device, count).await
    }

    async fn exchange(
        &self,
        device: &DeviceId,
        datagrams: &[Bytes],
        replies: usize,
    ) -> Result<Vec<Bytes>> {
        let link = self.link(device)?;
        // One guard for the whole exchange.
        let link = link.lock().await;
        self.send_on(&link, device, datagrams, 0).await?;
        self.recv_many(&link, device, replies).await
    }

    fn is_connected(&self, device: &DeviceId) -> bool {
        self.links().contains_key(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fake_device() -> (UdpSocket, DeviceId) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let id = DeviceId::new(socket.local_addr().unwrap().to_string());
        (socket, id)
    }

    #[tokio::test]
    async fn connect_and_disconnect() {
        let (_device, id) = fake_device().await;
        let transport = UdpTransport::new();

        assert!(!transport.is_connected(&id));
        transport.connect(&id).await.unwrap();
        assert!(transport.is_connected(&id));
        // A second connect is a no-op.
        transport.connect(&id).await.unwrap();

        transport.disconnect(&id).await.unwrap();
        assert!(!transport.is_connected(&id));
        assert!(matches!(
            transport.disconnect(&id).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn unknown_device_is_not_connected() {
        let transport = UdpTransport::new();
        let id = DeviceId::from("127.0.0.1:9");

        let sent = transport.send(&id, &[Bytes::from_static(b"x")], 0).await;
        assert!(matches!(sent, Err(Error::NotConnected)));
        let received = transport.receive(&id, 1).await;
        assert!(matches!(received, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn send_and_receive_loopback() {
        let (device, id) = fake_device().await;
        let transport = UdpTransport::new().with_timeout(Duration::from_secs(2));
        transport.connect(&id).await.unwrap();

        transport
            .send(&id, &[Bytes::from_static(b"ping")], 0)
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, host) = device.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        device.send_to(b"pong-1", host).await.unwrap();
        device.send_to(b"pong-2", host).await.unwrap();

        let replies = transport.receive(&id, 2).await.unwrap();
        assert_eq!(replies, vec![Bytes::from_static(b"pong-1"), Bytes::from_static(b"pong-2")]);
    }

    #[tokio::test]
    async fn receive_timeout_is_distinct() {
        let (_device, id) = fake_device().await;
        let transport = UdpTransport::new().with_timeout(Duration::from_millis(50));
        transport.connect(&id).await.unwrap();

        let result = transport.receive(&id, 1).await;
        assert!(
            matches!(result, Err(Error::Timeout)),
            "expected Timeout, got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn grouped_send_consumes_acks() {
        let (device, id) = fake_device().await;
        let transport = UdpTransport::new().with_timeout(Duration::from_secs(2));
        transport.connect(&id).await.unwrap();

        // The fake device acknowledges every datagram it sees.
        let echo = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            for _ in 0..5 {
                let (n, host) = device.recv_from(&mut buf).await.unwrap();
                device.send_to(&buf[..n], host).await.unwrap();
            }
        });

        let datagrams: Vec<Bytes> = (0u8..5).map(|i| Bytes::from(vec![i])).collect();
        transport.send(&id, &datagrams, 2).await.unwrap();
        echo.await.unwrap();

        // All acknowledgements were consumed by the grouped send.
        let transport = transport.with_timeout(Duration::from_millis(50));
        assert!(matches!(transport.receive(&id, 1).await, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn concurrent_exchanges_keep_replies_paired() {
        let (device, id) = fake_device().await;
        let transport = Arc::new(UdpTransport::new().with_timeout(Duration::from_secs(2)));
        transport.connect(&id).await.unwrap();

        // The fake device answers each request with its own bytes, doubled.
        let echo = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            for _ in 0..8 {
                let (n, host) = device.recv_from(&mut buf).await.unwrap();
                let mut reply = buf[..n].to_vec();
                reply.extend_from_slice(&buf[..n]);
                device.send_to(&reply, host).await.unwrap();
            }
        });

        let tasks: Vec<_> = (0u8..8)
            .map(|i| {
                let transport = transport.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    let replies = transport
                        .exchange(&id, &[Bytes::from(vec![i])], 1)
                        .await
                        .unwrap();
                    (i, replies)
                })
            })
            .collect();

        for task in tasks {
            let (i, replies) = task.await.unwrap();
            assert_eq!(replies, vec![Bytes::from(vec![i, i])]);
        }
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn exchange_times_out_without_reply() {
        let (_device, id) = fake_device().await;
        let transport = UdpTransport::new().with_timeout(Duration::from_millis(50));
        transport.connect(&id).await.unwrap();

        let result = transport.exchange(&id, &[Bytes::from_static(b"q")], 1).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn bare_ip_uses_default_port() {
        let transport = UdpTransport::new().with_default_port(47000);
        let addr = transport
            .resolve(&DeviceId::from("127.0.0.1"))
            .await
            .unwrap();
        assert_eq!(addr, "127.0.0.1:47000".parse::<SocketAddr>().unwrap());
    }
}
