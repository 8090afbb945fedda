//! APS2 packet encoder/decoder.
//!
//! Every exchange with the device is one datagram carrying one packet.
//! This module handles the pure byte-level encoding and decoding of those
//! packets and of the command word in their header.
//!
//! # Packet format
//!
//! ```text
//! <seq:u16> <command:u32> <addr:u32> [<payload word:u32>...]
//! ```
//!
//! All fields are big-endian. The command word packs:
//!
//! ```text
//! bit 31     r_w       (1 = read request)
//! bits 30-28 reserved  (always zero)
//! bits 27-24 opcode
//! bits 23-16 mode/status
//! bits 15-0  word count
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use awglib_core::{Error, Result};

/// Length of the fixed packet header in bytes.
pub const HEADER_LEN: usize = 10;

/// Largest number of payload words placed in one outgoing packet.
///
/// Smaller than the link MTU allows; larger payloads were observed to be
/// dropped by the device.
pub const MAX_PAYLOAD_WORDS: usize = 256;

const READ_BIT: u32 = 1 << 31;
const RESERVED_MASK: u32 = 0x7 << 28;

/// Operation code carried in the command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Reset = 0x0,
    /// Memory-mapped user I/O, acknowledged.
    UserIo = 0x1,
    /// Flash (EPROM) erase, write and read.
    EpromIo = 0x2,
    /// Chained chip configuration (DAC, PLL, VCXO).
    ChipConfigIo = 0x3,
    RunChipConfig = 0x4,
    /// FPGA image data, acknowledged.
    FpgaConfig = 0x5,
    /// Select the FPGA image to boot from.
    FpgaConfigCtrl = 0x6,
    Status = 0x7,
    UserIoNack = 0x9,
    FpgaConfigNack = 0xD,
}

impl Opcode {
    /// Decode the 4-bit opcode field.
    pub fn from_bits(bits: u8) -> Option<Opcode> {
        Some(match bits {
            0x0 => Opcode::Reset,
            0x1 => Opcode::UserIo,
            0x2 => Opcode::EpromIo,
            0x3 => Opcode::ChipConfigIo,
            0x4 => Opcode::RunChipConfig,
            0x5 => Opcode::FpgaConfig,
            0x6 => Opcode::FpgaConfigCtrl,
            0x7 => Opcode::Status,
            0x9 => Opcode::UserIoNack,
            0xD => Opcode::FpgaConfigNack,
            _ => return None,
        })
    }
}

/// The command word at the front of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    /// `true` for read requests.
    pub read: bool,
    /// Operation-specific mode on requests, device status on replies.
    pub mode_stat: u8,
    /// Number of payload words (or words requested, for reads).
    pub count: u16,
}

impl Command {
    /// A write command with zero mode and count.
    pub fn new(opcode: Opcode) -> Self {
        Command {
            opcode,
            read: false,
            mode_stat: 0,
            count: 0,
        }
    }

    /// Turn this into a read request for `count` words.
    pub fn read(mut self, count: u16) -> Self {
        self.read = true;
        self.count = count;
        self
    }

    pub fn mode(mut self, mode_stat: u8) -> Self {
        self.mode_stat = mode_stat;
        self
    }

    /// Pack into the 32-bit wire representation.
    pub fn to_word(self) -> u32 {
        let mut word = u32::from(self.count)
            | (u32::from(self.mode_stat) << 16)
            | ((self.opcode as u32 & 0xF) << 24);
        if self.read {
            word |= READ_BIT;
        }
        word
    }

    /// Unpack a wire command word, rejecting unknown opcodes and set
    /// reserved bits.
    pub fn from_word(word: u32) -> Result<Self> {
        if word & RESERVED_MASK != 0 {
            return Err(Error::Protocol(format!(
                "reserved bits set in command word {word:#010x}"
            )));
        }
        let bits = ((word >> 24) & 0xF) as u8;
        let opcode = Opcode::from_bits(bits)
            .ok_or_else(|| Error::Protocol(format!("unknown opcode {bits:#x}")))?;
        Ok(Command {
            opcode,
            read: word & READ_BIT != 0,
            mode_stat: ((word >> 16) & 0xFF) as u8,
            count: (word & 0xFFFF) as u16,
        })
    }
}

/// One protocol packet: header plus payload words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number, stamped by the engine when the packet is sent.
    pub seq: u16,
    pub command: Command,
    /// Target byte address in the device's address space.
    pub addr: u32,
    pub payload: Vec<u32>,
}

impl Packet {
    /// A header-only packet.
    pub fn new(command: Command, addr: u32) -> Self {
        Packet {
            seq: 0,
            command,
            addr,
            payload: Vec::new(),
        }
    }

    /// A packet carrying `payload`; the header word count is set from it.
    pub fn with_payload(mut command: Command, addr: u32, payload: Vec<u32>) -> Result<Self> {
        command.count = u16::try_from(payload.len()).map_err(|_| {
            Error::InvalidParameter(format!("payload of {} words is too large", payload.len()))
        })?;
        Ok(Packet {
            seq: 0,
            command,
            addr,
            payload,
        })
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 4 * self.payload.len());
        buf.put_u16(self.seq);
        buf.put_u32(self.command.to_word());
        buf.put_u32(self.addr);
        for word in &self.payload {
            buf.put_u32(*word);
        }
        buf.freeze()
    }

    /// Decode wire bytes.
    ///
    /// A packet carrying payload must have a header word count equal to the
    /// number of words present. Header-only packets (read requests,
    /// acknowledgements) may carry any count.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "packet too short: {} bytes",
                data.len()
            )));
        }
        if (data.len() - HEADER_LEN) % 4 != 0 {
            return Err(Error::Protocol(format!(
                "payload of {} bytes is not word aligned",
                data.len() - HEADER_LEN
            )));
        }

        let mut buf = data;
        let seq = buf.get_u16();
        let command = Command::from_word(buf.get_u32())?;
        let addr = buf.get_u32();
        let mut payload = Vec::with_capacity(buf.remaining() / 4);
        while buf.has_remaining() {
            payload.push(buf.get_u32());
        }

        if !payload.is_empty() && usize::from(command.count) != payload.len() {
            return Err(Error::Protocol(format!(
                "header count {} does not match {} payload words",
                command.count,
                payload.len()
            )));
        }

        Ok(Packet {
            seq,
            command,
            addr,
            payload,
        })
    }
}
