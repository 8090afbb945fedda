//! Mock transport for deterministic testing of protocol engines.
//!
//! [`MockTransport`] implements the [`Transport`] contract in memory. It
//! supports two ways of scripting the device side:
//!
//! - exact request/reply expectations, consumed in order, and
//! - a responder closure that sees every datagram and returns the replies
//!   a simulated device would send.
//!
//! Every datagram sent is recorded per device, so tests can decode and
//! inspect the exact traffic a protocol engine produced.
//!
//! # Example
//!
//! ```
//! use awglib_core::DeviceId;
//! use awglib_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! let device = DeviceId::from("10.0.0.2");
//! // When this request is sent, queue this reply for the next receive().
//! mock.expect(&device, &[0x00, 0x01], &[&[0x00, 0x01, 0xFF]]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use awglib_core::error::{Error, Result};
use awglib_core::transport::{DeviceId, Transport};

/// Closure standing in for the device: maps one received datagram to
/// the replies the device sends back.
pub type Responder = Box<dyn FnMut(&DeviceId, &[u8]) -> Vec<Bytes> + Send>;

/// A pre-loaded request/replies pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Datagrams queued for `receive()` when the request matches.
    replies: Vec<Bytes>,
}

/// Per-device mock state.
#[derive(Debug, Default)]
struct MockDevice {
    connected: bool,
    expectations: VecDeque<Expectation>,
    inbox: VecDeque<Bytes>,
    sent_log: Vec<Bytes>,
}

/// A mock [`Transport`] for testing protocol engines without hardware.
///
/// Each sent datagram is matched against the device's next expectation if
/// any remain, otherwise it is handed to the responder (if one is set),
/// otherwise it is only recorded. Replies accumulate in a per-device
/// inbox drained by `receive()` and `exchange()`; asking for more replies
/// than are queued fails with [`Error::Timeout`].
pub struct MockTransport {
    devices: Mutex<HashMap<DeviceId, MockDevice>>,
    responder: Mutex<Option<Responder>>,
}

impl MockTransport {
    /// Create a new mock transport with no devices connected.
    pub fn new() -> Self {
        MockTransport {
            devices: Mutex::new(HashMap::new()),
            responder: Mutex::new(None),
        }
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<DeviceId, MockDevice>> {
        self.devices.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Add an expected request and the replies it produces.
    pub fn expect(&self, device: &DeviceId, request: &[u8], replies: &[&[u8]]) {
        self.devices()
            .entry(device.clone())
            .or_default()
            .expectations
            .push_back(Expectation {
                request: request.to_vec(),
                replies: replies.iter().map(|r| Bytes::copy_from_slice(r)).collect(),
            });
    }

    /// Install a responder that simulates the device side.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&DeviceId, &[u8]) -> Vec<Bytes> + Send + 'static,
    {
        *self.responder.lock().unwrap_or_else(|p| p.into_inner()) = Some(Box::new(responder));
    }

    /// Queue an unsolicited reply for the next `receive()` on `device`.
    pub fn push_reply(&self, device: &DeviceId, reply: &[u8]) {
        self.devices()
            .entry(device.clone())
            .or_default()
            .inbox
            .push_back(Bytes::copy_from_slice(reply));
    }

    /// Return every datagram sent to `device`, in order.
    pub fn sent_data(&self, device: &DeviceId) -> Vec<Bytes> {
        self.devices()
            .get(device)
            .map(|d| d.sent_log.clone())
            .unwrap_or_default()
    }

    /// Forget the datagrams recorded so far for `device`.
    pub fn clear_sent(&self, device: &DeviceId) {
        if let Some(d) = self.devices().get_mut(device) {
            d.sent_log.clear();
        }
    }

    /// Return the number of expectations for `device` not yet consumed.
    pub fn remaining_expectations(&self, device: &DeviceId) -> usize {
        self.devices()
            .get(device)
            .map_or(0, |d| d.expectations.len())
    }

    /// Return the number of replies queued for `device` but not yet received.
    pub fn pending_replies(&self, device: &DeviceId) -> usize {
        self.devices().get(device).map_or(0, |d| d.inbox.len())
    }

    /// Force the connected state of `device`.
    pub fn set_connected(&self, device: &DeviceId, connected: bool) {
        self.devices().entry(device.clone()).or_default().connected = connected;
    }

    fn deliver(&self, state: &mut MockDevice, device: &DeviceId, datagram: &Bytes) -> Result<()> {
        state.sent_log.push(datagram.clone());

        if let Some(expectation) = state.expectations.pop_front() {
            if datagram.as_ref() != expectation.request.as_slice() {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request,
                    datagram.as_ref()
                )));
            }
            state.inbox.extend(expectation.replies);
            return Ok(());
        }

        let mut responder = self.responder.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(respond) = responder.as_mut() {
            let replies = respond(device, datagram);
            tracing::trace!(device = %device, replies = replies.len(), "Mock device responded");
            state.inbox.extend(replies);
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("devices", &self.devices().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, device: &DeviceId) -> Result<()> {
        self.devices().entry(device.clone()).or_default().connected = true;
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        match self.devices().get_mut(device) {
            Some(d) if d.connected => {
                d.connected = false;
                d.inbox.clear();
                Ok(())
            }
            _ => Err(Error::NotConnected),
        }
    }

    async fn send(&self, device: &DeviceId, datagrams: &[Bytes], ack_every: usize) -> Result<()> {
        let mut devices = self.devices();
        let state = match devices.get_mut(device) {
            Some(d) if d.connected => d,
            _ => return Err(Error::NotConnected),
        };

        let group = if ack_every == 0 { datagrams.len().max(1) } else { ack_every };
        for chunk in datagrams.chunks(group) {
            for datagram in chunk {
                self.deliver(state, device, datagram)?;
            }
            if ack_every > 0 {
                if state.inbox.len() < chunk.len() {
                    return Err(Error::Timeout);
                }
                state.inbox.drain(..chunk.len());
            }
        }
        Ok(())
    }

    async fn receive(&self, device: &DeviceId, count: usize) -> Result<Vec<Bytes>> {
        let mut devices = self.devices();
        let state = match devices.get_mut(device) {
            Some(d) if d.connected => d,
            _ => return Err(Error::NotConnected),
        };
        if state.inbox.len() < count {
            return Err(Error::Timeout);
        }
        Ok(state.inbox.drain(..count).collect())
    }

    async fn exchange(
        &self,
        device: &DeviceId,
        datagrams: &[Bytes],
        replies: usize,
    ) -> Result<Vec<Bytes>> {
        let mut devices = self.devices();
        let state = match devices.get_mut(device) {
            Some(d) if d.connected => d,
            _ => return Err(Error::NotConnected),
        };
        for datagram in datagrams {
            self.deliver(state, device, datagram)?;
        }
        if state.inbox.len() < replies {
            return Err(Error::Timeout);
        }
        Ok(state.inbox.drain(..replies).collect())
    }

    fn is_connected(&self, device: &DeviceId) -> bool {
        self.devices().get(device).is_some_and(|d| d.connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> DeviceId {
        DeviceId::from("10.0.0.2")
    }

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();
        mock.expect(&dev(), &[0x01, 0x02], &[&[0xAA], &[0xBB]]);

        mock.send(&dev(), &[Bytes::from_static(&[0x01, 0x02])], 0)
            .await
            .unwrap();

        let replies = mock.receive(&dev(), 2).await.unwrap();
        assert_eq!(replies, vec![Bytes::from_static(&[0xAA]), Bytes::from_static(&[0xBB])]);
        assert_eq!(mock.remaining_expectations(&dev()), 0);
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();

        mock.send(&dev(), &[Bytes::from_static(b"a"), Bytes::from_static(b"b")], 0)
            .await
            .unwrap();

        let sent = mock.sent_data(&dev());
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].as_ref(), b"a");
        assert_eq!(sent[1].as_ref(), b"b");

        mock.clear_sent(&dev());
        assert!(mock.sent_data(&dev()).is_empty());
    }

    #[tokio::test]
    async fn mock_transport_wrong_request_errors() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();
        mock.expect(&dev(), &[0x01], &[&[0xAA]]);

        let result = mock.send(&dev(), &[Bytes::from_static(&[0x02])], 0).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn mock_transport_receive_without_reply_times_out() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();

        let result = mock.receive(&dev(), 1).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn mock_transport_unopened_device_not_connected() {
        let mock = MockTransport::new();
        let result = mock.send(&dev(), &[Bytes::from_static(b"x")], 0).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(matches!(mock.receive(&dev(), 1).await, Err(Error::NotConnected)));
        assert!(matches!(mock.disconnect(&dev()).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn mock_transport_responder_echoes() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();
        mock.set_responder(|_, data| vec![Bytes::copy_from_slice(data)]);

        mock.send(&dev(), &[Bytes::from_static(b"hi")], 0).await.unwrap();
        assert_eq!(mock.pending_replies(&dev()), 1);
        let replies = mock.receive(&dev(), 1).await.unwrap();
        assert_eq!(replies[0].as_ref(), b"hi");
    }

    #[tokio::test]
    async fn mock_transport_grouped_send_drains_acks() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();
        mock.set_responder(|_, data| vec![Bytes::copy_from_slice(data)]);

        let datagrams: Vec<Bytes> = (0u8..5).map(|i| Bytes::from(vec![i])).collect();
        mock.send(&dev(), &datagrams, 2).await.unwrap();

        assert_eq!(mock.sent_data(&dev()).len(), 5);
        assert_eq!(mock.pending_replies(&dev()), 0);
    }

    #[tokio::test]
    async fn mock_transport_grouped_send_without_acks_times_out() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();

        let result = mock.send(&dev(), &[Bytes::from_static(b"x")], 1).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn mock_transport_exchange_returns_replies() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();
        mock.set_responder(|_, data| vec![Bytes::copy_from_slice(data)]);

        let replies = mock
            .exchange(&dev(), &[Bytes::from_static(b"a"), Bytes::from_static(b"b")], 2)
            .await
            .unwrap();
        assert_eq!(replies, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(mock.pending_replies(&dev()), 0);

        let short = mock.exchange(&dev(), &[Bytes::from_static(b"c")], 2).await;
        assert!(matches!(short, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn mock_transport_devices_are_independent() {
        let mock = MockTransport::new();
        let other = DeviceId::from("10.0.0.3");
        mock.connect(&dev()).await.unwrap();
        mock.connect(&other).await.unwrap();
        mock.push_reply(&dev(), b"for-a");

        assert!(matches!(mock.receive(&other, 1).await, Err(Error::Timeout)));
        assert_eq!(mock.receive(&dev(), 1).await.unwrap()[0].as_ref(), b"for-a");
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mock = MockTransport::new();
        mock.connect(&dev()).await.unwrap();
        assert!(mock.is_connected(&dev()));

        mock.disconnect(&dev()).await.unwrap();
        assert!(!mock.is_connected(&dev()));
        mock.set_connected(&dev(), true);
        assert!(mock.is_connected(&dev()));
    }
}
