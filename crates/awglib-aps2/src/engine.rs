//! Command/query engine.
//!
//! [`Engine`] owns the session's view of the transport: the shared
//! registry, the device identity, and the outgoing sequence counter. It
//! implements the stop-and-wait exchange discipline every higher layer
//! builds on: a query sends one packet and waits for exactly one reply
//! before anything else is sent to the device.
//!
//! Replies are accepted in arrival order. Sequence numbers are stamped for
//! diagnostics only; a query checks that the reply carries the request's
//! opcode but does not match on sequence number.

use std::sync::Arc;

use awglib_core::{DeviceId, Error, Result, Transport};
use tracing::{debug, trace};

use crate::packet::{Command, MAX_PAYLOAD_WORDS, Opcode, Packet};

/// Stop-and-wait protocol engine for one device.
pub struct Engine {
    transport: Arc<dyn Transport>,
    device: DeviceId,
    next_seq: u16,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, device: DeviceId) -> Self {
        Engine {
            transport,
            device,
            next_seq: 0,
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected(&self.device)
    }

    /// Stamp the next sequence number onto `packet` and encode it.
    fn stamp(&mut self, mut packet: Packet) -> bytes::Bytes {
        packet.seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        trace!(
            device = %self.device,
            seq = packet.seq,
            opcode = ?packet.command.opcode,
            addr = format_args!("{:#010x}", packet.addr),
            words = packet.payload.len(),
            "Sending packet"
        );
        packet.encode()
    }

    /// Send `packets` in order without waiting for replies.
    ///
    /// With a non-zero `ack_every` the transport waits for one
    /// acknowledgement per packet after every group of that many packets.
    pub async fn send_packets(&mut self, packets: Vec<Packet>, ack_every: usize) -> Result<()> {
        if packets.is_empty() {
            return Ok(());
        }
        let datagrams: Vec<_> = packets.into_iter().map(|p| self.stamp(p)).collect();
        self.transport
            .send(&self.device, &datagrams, ack_every)
            .await
    }

    /// Send `data` under `command`, fragmented into as many packets as
    /// needed with auto-incremented addresses. No reply is awaited.
    pub async fn send(&mut self, command: Command, addr: u32, data: &[u32]) -> Result<()> {
        let packets = fragment(command, addr, data)?;
        self.send_packets(packets, 0).await
    }

    /// Send a header-only command without waiting for a reply.
    pub async fn write_command(&mut self, command: Command, addr: u32) -> Result<()> {
        self.send_packets(vec![Packet::new(command, addr)], 0).await
    }

    /// Send `packets` and read `replies` reply packets as one exchange.
    ///
    /// The transport keeps the device to this session from the first
    /// packet sent until the last reply arrives.
    pub async fn exchange_packets(
        &mut self,
        packets: Vec<Packet>,
        replies: usize,
    ) -> Result<Vec<Packet>> {
        let datagrams: Vec<_> = packets.into_iter().map(|p| self.stamp(p)).collect();
        let received = self
            .transport
            .exchange(&self.device, &datagrams, replies)
            .await?;
        self.decode_replies(&received)
    }

    fn decode_replies(&self, datagrams: &[bytes::Bytes]) -> Result<Vec<Packet>> {
        datagrams
            .iter()
            .map(|d| {
                let packet = Packet::decode(d)?;
                trace!(
                    device = %self.device,
                    seq = packet.seq,
                    opcode = ?packet.command.opcode,
                    status = packet.command.mode_stat,
                    words = packet.payload.len(),
                    "Received packet"
                );
                Ok(packet)
            })
            .collect()
    }

    /// Send one packet and wait for its single reply.
    pub async fn query_packet(&mut self, packet: Packet) -> Result<Packet> {
        let opcode = packet.command.opcode;
        let reply = self
            .exchange_packets(vec![packet], 1)
            .await?
            .pop()
            .ok_or_else(|| Error::Protocol("no reply received".into()))?;
        if reply.command.opcode != opcode {
            debug!(
                device = %self.device,
                expected = ?opcode,
                got = ?reply.command.opcode,
                "Reply opcode mismatch"
            );
            return Err(Error::Protocol(format!(
                "expected {:?} reply, got {:?}",
                opcode, reply.command.opcode
            )));
        }
        Ok(reply)
    }

    /// Send a header-only command and wait for its single reply.
    pub async fn query(&mut self, command: Command, addr: u32) -> Result<Packet> {
        self.query_packet(Packet::new(command, addr)).await
    }
}

/// Split `data` into packets of at most [`MAX_PAYLOAD_WORDS`] words.
///
/// Each packet's address follows the previous one by four bytes per word
/// it carried.
pub fn fragment(command: Command, addr: u32, data: &[u32]) -> Result<Vec<Packet>> {
    let mut packets = Vec::with_capacity(data.len().div_ceil(MAX_PAYLOAD_WORDS));
    let mut next_addr = addr;
    for chunk in data.chunks(MAX_PAYLOAD_WORDS) {
        packets.push(Packet::with_payload(command, next_addr, chunk.to_vec())?);
        next_addr = next_addr.wrapping_add(4 * chunk.len() as u32);
    }
    Ok(packets)
}

/// Convenience constructor for the memory-write command.
pub(crate) fn user_io() -> Command {
    Command::new(Opcode::UserIo)
}
