//! Memory access layer: device address-space reads and writes.

use awglib_core::{Error, Result};
use tracing::debug;

use crate::engine::{Engine, fragment, user_io};
use crate::packet::MAX_PAYLOAD_WORDS;

impl Engine {
    /// Write `words` starting at byte address `addr`.
    ///
    /// The data is fragmented into packets of at most
    /// [`MAX_PAYLOAD_WORDS`] words with consecutive addresses. All
    /// fragments are sent, then one acknowledgement per fragment is read,
    /// in a single transport exchange.
    pub async fn write_memory(&mut self, addr: u32, words: &[u32]) -> Result<()> {
        let packets = fragment(user_io(), addr, words)?;
        let n = packets.len();
        debug!(
            device = %self.device(),
            addr = format_args!("{addr:#010x}"),
            words = words.len(),
            packets = n,
            "Writing memory"
        );
        self.exchange_packets(packets, n).await?;
        Ok(())
    }

    /// Read `count` words starting at byte address `addr` with a single
    /// request packet.
    pub async fn read_memory(&mut self, addr: u32, count: usize) -> Result<Vec<u32>> {
        if count > MAX_PAYLOAD_WORDS {
            return Err(Error::InvalidParameter(format!(
                "read of {count} words exceeds the {MAX_PAYLOAD_WORDS}-word packet limit"
            )));
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let reply = self.query(user_io().read(count as u16), addr).await?;
        if reply.payload.len() != count {
            return Err(Error::Protocol(format!(
                "requested {count} words at {addr:#010x}, got {}",
                reply.payload.len()
            )));
        }
        Ok(reply.payload)
    }

    /// Read any number of words as consecutive single-packet reads.
    pub async fn read_memory_chunked(&mut self, addr: u32, count: usize) -> Result<Vec<u32>> {
        let mut out = Vec::with_capacity(count);
        let mut next = addr;
        while out.len() < count {
            let n = (count - out.len()).min(MAX_PAYLOAD_WORDS);
            out.extend(self.read_memory(next, n).await?);
            next = next.wrapping_add(4 * n as u32);
        }
        Ok(out)
    }

    pub async fn read_register(&mut self, addr: u32) -> Result<u32> {
        let words = self.read_memory(addr, 1).await?;
        words
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol(format!("empty read of register {addr:#010x}")))
    }

    pub async fn write_register(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_memory(addr, &[value]).await
    }

    /// Read-modify-write: set `mask` bits in the register at `addr`.
    pub async fn set_register_bits(&mut self, addr: u32, mask: u32) -> Result<()> {
        let value = self.read_register(addr).await?;
        self.write_register(addr, value | mask).await
    }

    /// Read-modify-write: clear `mask` bits in the register at `addr`.
    pub async fn clear_register_bits(&mut self, addr: u32, mask: u32) -> Result<()> {
        let value = self.read_register(addr).await?;
        self.write_register(addr, value & !mask).await
    }
}
