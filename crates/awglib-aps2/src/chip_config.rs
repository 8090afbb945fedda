//! Chip configuration sub-protocol.
//!
//! The device forwards chained configuration messages to its SPI
//! peripherals (two DACs, the clock PLL, the VCXO). A message is a list of
//! 32-bit instruction words terminated by an end-of-list word:
//!
//! ```text
//! bits 31-24 target
//! bits 23-16 SPI byte count, or data byte for single writes
//! bits 15-0  peripheral instruction
//! ```
//!
//! Register reads need the read instruction repeated four times before the
//! interface logic latches a value, which is then fetched with a separate
//! one-word read.

use awglib_core::{Error, Result};
use tracing::trace;

use crate::engine::Engine;
use crate::packet::{Command, MAX_PAYLOAD_WORDS, Opcode, Packet};

/// Instruction target codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Target {
    Pause = 0x00,
    Dac0Multi = 0x10,
    Dac1Multi = 0x20,
    PllMulti = 0x30,
    Vcxo = 0x40,
    Dac0Single = 0xC8,
    Dac1Single = 0xCC,
    PllSingle = 0xD0,
    EndOfList = 0xFF,
}

/// One instruction word of a configuration message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigWord {
    pub target: u8,
    pub spicnt_data: u8,
    pub instr: u16,
}

impl ConfigWord {
    pub fn new(target: Target, spicnt_data: u8, instr: u16) -> Self {
        ConfigWord {
            target: target as u8,
            spicnt_data,
            instr,
        }
    }

    pub fn to_word(self) -> u32 {
        (u32::from(self.target) << 24) | (u32::from(self.spicnt_data) << 16) | u32::from(self.instr)
    }

    pub fn from_word(word: u32) -> Self {
        ConfigWord {
            target: (word >> 24) as u8,
            spicnt_data: (word >> 16) as u8,
            instr: word as u16,
        }
    }
}

/// The end-of-list marker word.
pub fn end_of_list() -> u32 {
    ConfigWord::new(Target::EndOfList, 0, 0).to_word()
}

/// One SPI register write: `(address, data)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiWrite {
    pub addr: u16,
    pub data: u8,
}

impl SpiWrite {
    pub const fn new(addr: u16, data: u8) -> Self {
        SpiWrite { addr, data }
    }
}

/// A peripheral with readable SPI registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiDevice {
    Dac0,
    Dac1,
    Pll,
}

impl SpiDevice {
    fn single_target(self) -> Target {
        match self {
            SpiDevice::Dac0 => Target::Dac0Single,
            SpiDevice::Dac1 => Target::Dac1Single,
            SpiDevice::Pll => Target::PllSingle,
        }
    }
}

/// DAC SPI instruction byte: `r_w[7] N[6:5] addr[4:0]`.
pub fn dac_instruction(addr: u16, read: bool) -> u16 {
    let mut instr = addr & 0x1F;
    if read {
        instr |= 1 << 7;
    }
    instr
}

/// PLL SPI instruction: `r_w[15] W[14:13] addr[12:0]`.
pub fn pll_instruction(addr: u16, read: bool) -> u16 {
    let mut instr = addr & 0x1FFF;
    if read {
        instr |= 1 << 15;
    }
    instr
}

/// Single-byte register writes to one DAC.
pub fn dac_message(dac: SpiDevice, writes: &[SpiWrite]) -> Vec<u32> {
    let target = dac.single_target();
    writes
        .iter()
        .map(|w| ConfigWord::new(target, w.data, dac_instruction(w.addr, false)).to_word())
        .collect()
}

/// Single-byte register writes to the clock PLL.
pub fn pll_message(writes: &[SpiWrite]) -> Vec<u32> {
    writes
        .iter()
        .map(|w| ConfigWord::new(Target::PllSingle, w.data, pll_instruction(w.addr, false)).to_word())
        .collect()
}

/// VCXO programming: each group of four bytes is preceded by a VCXO
/// instruction word and sent as one big-endian data word.
pub fn vcxo_message(data: &[u8]) -> Result<Vec<u32>> {
    if data.len() % 4 != 0 {
        return Err(Error::InvalidParameter(format!(
            "VCXO data must be a multiple of 4 bytes, got {}",
            data.len()
        )));
    }
    let mut msg = Vec::with_capacity(data.len() / 2);
    for chunk in data.chunks_exact(4) {
        msg.push(ConfigWord::new(Target::Vcxo, 0, 0).to_word());
        msg.push(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(msg)
}

/// The four-word stimulus that latches one register for reading.
pub fn read_message(device: SpiDevice, addr: u16) -> Vec<u32> {
    let instr = match device {
        SpiDevice::Dac0 | SpiDevice::Dac1 => dac_instruction(addr, true),
        SpiDevice::Pll => pll_instruction(addr, true),
    };
    vec![ConfigWord::new(device.single_target(), 1, instr).to_word(); 4]
}

impl Engine {
    /// Send a configuration message, terminated with the end-of-list word,
    /// and wait for the device's acknowledgement.
    pub async fn write_config(&mut self, message: &[u32]) -> Result<()> {
        if message.len() + 1 > MAX_PAYLOAD_WORDS {
            return Err(Error::InvalidParameter(format!(
                "configuration message of {} words is too long",
                message.len()
            )));
        }
        let mut payload = message.to_vec();
        payload.push(end_of_list());
        trace!(device = %self.device(), words = payload.len(), "Writing chip configuration");
        let packet = Packet::with_payload(Command::new(Opcode::ChipConfigIo), 0, payload)?;
        self.query_packet(packet).await?;
        Ok(())
    }

    /// Read one SPI register from `device`.
    pub async fn read_config(&mut self, device: SpiDevice, addr: u16) -> Result<u8> {
        self.write_config(&read_message(device, addr)).await?;
        let reply = self
            .query(Command::new(Opcode::ChipConfigIo).read(1), 0)
            .await?;
        let word = reply.payload.first().copied().ok_or_else(|| {
            Error::Protocol(format!("empty read of {device:?} register {addr:#x}"))
        })?;
        let value = (word >> 24) as u8;
        trace!(device = %self.device(), spi = ?device, addr, value, "Read SPI register");
        Ok(value)
    }

    pub async fn write_dac_register(&mut self, dac: SpiDevice, addr: u16, data: u8) -> Result<()> {
        self.write_config(&dac_message(dac, &[SpiWrite::new(addr, data)]))
            .await
    }

    pub async fn write_pll_register(&mut self, addr: u16, data: u8) -> Result<()> {
        self.write_config(&pll_message(&[SpiWrite::new(addr, data)]))
            .await
    }
}
