//! Flash (EPROM) programming.
//!
//! Flash is erased in 64 KiB pages and written in 64-word blocks. A write
//! always erases the pages it covers first, so the start address must be
//! page aligned.

use awglib_core::{Error, Result};
use tracing::{debug, info};

use crate::engine::Engine;
use crate::packet::{Command, Opcode, Packet};

/// Erase granularity in bytes.
pub const FLASH_PAGE_BYTES: u32 = 65536;

/// Words per flash write packet.
pub const FLASH_BLOCK_WORDS: usize = 64;

/// Largest flash read the device answers in one reply.
pub const MAX_FLASH_READ_WORDS: usize = 365;

/// Fill word for the tail of the last block (erased-flash value).
pub const FLASH_PAD_WORD: u32 = 0xFFFF_FFFF;

/// Flash mode: read or write.
pub const EPROM_RW: u8 = 0x00;
/// Flash mode: erase one page.
pub const EPROM_ERASE: u8 = 0x01;
/// Reply status: the device failed the flash operation.
pub const EPROM_OPERATION_FAILED: u8 = 0x0A;

fn check_alignment(addr: u32) -> Result<()> {
    if addr % FLASH_PAGE_BYTES != 0 {
        return Err(Error::Alignment {
            address: addr,
            alignment: FLASH_PAGE_BYTES,
        });
    }
    Ok(())
}

fn check_status(operation: &'static str, reply: &Packet) -> Result<()> {
    if reply.command.mode_stat == EPROM_OPERATION_FAILED {
        return Err(Error::DeviceReported {
            operation,
            status: reply.command.mode_stat,
        });
    }
    Ok(())
}

impl Engine {
    /// Erase the pages covering `num_bytes` starting at `addr`.
    pub async fn erase_flash(&mut self, addr: u32, num_bytes: u32) -> Result<()> {
        check_alignment(addr)?;
        let pages = num_bytes.div_ceil(FLASH_PAGE_BYTES);
        debug!(
            device = %self.device(),
            addr = format_args!("{addr:#010x}"),
            pages,
            "Erasing flash"
        );
        for page in 0..pages {
            let page_addr = addr.wrapping_add(page * FLASH_PAGE_BYTES);
            let reply = self
                .query(Command::new(Opcode::EpromIo).mode(EPROM_ERASE), page_addr)
                .await?;
            check_status("flash erase", &reply)?;
        }
        Ok(())
    }

    /// Erase then write `data` to flash at the page-aligned `addr`.
    ///
    /// The data is padded with [`FLASH_PAD_WORD`] to a whole number of
    /// blocks. Writes are not retried; a failure leaves the region in an
    /// unknown state and the caller must re-issue the whole write.
    pub async fn write_flash(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        check_alignment(addr)?;
        let num_bytes = u32::try_from(4 * data.len())
            .map_err(|_| Error::InvalidParameter("flash image too large".into()))?;
        self.erase_flash(addr, num_bytes).await?;

        let mut padded = data.to_vec();
        padded.resize(data.len().next_multiple_of(FLASH_BLOCK_WORDS), FLASH_PAD_WORD);

        let packets = padded
            .chunks(FLASH_BLOCK_WORDS)
            .enumerate()
            .map(|(i, block)| {
                let block_addr = addr.wrapping_add((4 * FLASH_BLOCK_WORDS * i) as u32);
                Packet::with_payload(
                    Command::new(Opcode::EpromIo).mode(EPROM_RW),
                    block_addr,
                    block.to_vec(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let blocks = packets.len();

        for reply in self.exchange_packets(packets, blocks).await? {
            check_status("flash write", &reply)?;
        }
        info!(
            device = %self.device(),
            addr = format_args!("{addr:#010x}"),
            words = data.len(),
            blocks,
            "Flash written"
        );
        Ok(())
    }

    /// Read up to [`MAX_FLASH_READ_WORDS`] words from flash.
    ///
    /// Longer requests are truncated to the hardware limit.
    pub async fn read_flash(&mut self, addr: u32, count: usize) -> Result<Vec<u32>> {
        let count = count.min(MAX_FLASH_READ_WORDS);
        let reply = self
            .query(Command::new(Opcode::EpromIo).read(count as u16), addr)
            .await?;
        check_status("flash read", &reply)?;
        Ok(reply.payload)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use awglib_core::{DeviceId, Transport};
    use awglib_test_harness::MockTransport;

    use super::*;
    use crate::sim::SimDevice;

    fn dev() -> DeviceId {
        DeviceId::from("10.0.0.2")
    }

    async fn setup() -> (Engine, Arc<MockTransport>, Arc<std::sync::Mutex<SimDevice>>) {
        let mock = Arc::new(MockTransport::new());
        mock.connect(&dev()).await.unwrap();
        let sim = SimDevice::attach(&mock);
        (Engine::new(mock.clone(), dev()), mock, sim)
    }

    fn sent_packets(mock: &MockTransport) -> Vec<Packet> {
        mock.sent_data(&dev())
            .iter()
            .map(|d| Packet::decode(d).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn misaligned_write_sends_nothing() {
        let (mut engine, mock, _sim) = setup().await;
        let result = engine.write_flash(0x1000, &[1, 2, 3]).await;

        assert!(matches!(
            result,
            Err(Error::Alignment {
                address: 0x1000,
                alignment: FLASH_PAGE_BYTES
            })
        ));
        assert!(mock.sent_data(&dev()).is_empty());
    }

    #[tokio::test]
    async fn write_pads_to_whole_blocks() {
        let (mut engine, mock, sim) = setup().await;
        let data: Vec<u32> = (0..(64 * 2 + 10)).collect();

        engine.write_flash(0x0002_0000, &data).await.unwrap();

        let packets = sent_packets(&mock);
        let erases: Vec<&Packet> = packets
            .iter()
            .filter(|p| p.command.mode_stat == EPROM_ERASE)
            .collect();
        let writes: Vec<&Packet> = packets
            .iter()
            .filter(|p| p.command.mode_stat == EPROM_RW && !p.command.read)
            .collect();

        assert_eq!(erases.len(), 1);
        assert_eq!(erases[0].addr, 0x0002_0000);
        assert_eq!(writes.len(), 3);
        let addrs: Vec<u32> = writes.iter().map(|p| p.addr).collect();
        assert_eq!(addrs, vec![0x0002_0000, 0x0002_0100, 0x0002_0200]);
        assert!(writes.iter().all(|p| p.command.count == 64));
        assert_eq!(&writes[2].payload[..10], &data[128..]);
        assert!(writes[2].payload[10..].iter().all(|w| *w == FLASH_PAD_WORD));

        // Erase happens before any block is written.
        assert_eq!(packets[0].command.mode_stat, EPROM_ERASE);

        let sim = sim.lock().unwrap();
        assert_eq!(sim.erased_pages, vec![0x0002_0000]);
        assert_eq!(sim.read_flash_words(0x0002_0000, data.len()), data);
    }

    #[tokio::test]
    async fn write_spanning_pages_erases_each() {
        let (mut engine, mock, sim) = setup().await;
        let data = vec![0xABCD_0123; 16384 + 1];

        engine.write_flash(0, &data).await.unwrap();

        assert_eq!(sim.lock().unwrap().erased_pages, vec![0, FLASH_PAGE_BYTES]);
        let writes = sent_packets(&mock)
            .iter()
            .filter(|p| p.command.mode_stat == EPROM_RW)
            .count();
        assert_eq!(writes, 16384 / 64 + 1);
    }

    #[tokio::test]
    async fn erase_failure_is_reported() {
        let (mut engine, mock, sim) = setup().await;
        sim.lock().unwrap().fail_flash = true;

        let result = engine.write_flash(0, &[1, 2, 3]).await;
        assert!(matches!(
            result,
            Err(Error::DeviceReported {
                operation: "flash erase",
                status: EPROM_OPERATION_FAILED
            })
        ));
        // No write blocks follow a failed erase.
        assert_eq!(sent_packets(&mock).len(), 1);
    }

    #[tokio::test]
    async fn read_is_capped() {
        let (mut engine, mock, sim) = setup().await;
        sim.lock().unwrap().write_flash_words(0, &vec![9; 400]);

        let words = engine.read_flash(0, 1000).await.unwrap();
        assert_eq!(words.len(), MAX_FLASH_READ_WORDS);

        let request = &sent_packets(&mock)[0];
        assert!(request.command.read);
        assert_eq!(usize::from(request.command.count), MAX_FLASH_READ_WORDS);
    }
}
