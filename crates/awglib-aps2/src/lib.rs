//! APS2 arbitrary waveform generator backend for awglib.
//!
//! This crate implements the APS2's point-to-point packet protocol and the
//! bring-up procedures built on it. It provides:
//!
//! - **Packet codec** ([`packet`]) -- the 10-byte header, command word
//!   layout and payload framing.
//! - **Command engine** ([`engine`]) -- stop-and-wait send/query over a
//!   [`Transport`](awglib_core::Transport), with write fragmentation.
//!   Memory ([`memory`]) and flash ([`flash`]) access are built on it.
//! - **Chip configuration** ([`chip_config`]) -- chained SPI instruction
//!   messages for the DACs, clock PLL and VCXO.
//! - **Calibration** ([`dac`], [`pll`]) -- DAC sampling-window search and
//!   channel clock synchronization, each a bounded state machine.
//! - **Link lists** ([`link_list`]) and per-channel waveform state
//!   ([`channel`]).
//! - **Aps2** ([`device`]) -- a device session composing all of the above,
//!   constructed with [`Aps2Builder`].
//!
//! # Example
//!
//! ```
//! use awglib_aps2::packet::{Command, Opcode, Packet};
//!
//! // A one-word register read at the control/status block.
//! let packet = Packet::new(Command::new(Opcode::UserIo).read(1), 0x44A0_0000);
//! let bytes = packet.encode();
//! assert_eq!(bytes.len(), 10);
//! assert_eq!(Packet::decode(&bytes).unwrap(), packet);
//! ```

pub mod builder;
pub mod channel;
pub mod chip_config;
pub mod dac;
pub mod device;
pub mod engine;
pub mod flash;
pub mod link_list;
pub mod memory;
pub mod outcome;
pub mod packet;
pub mod pll;
pub mod registers;
pub mod status;

#[cfg(test)]
mod sim;

pub use builder::Aps2Builder;
pub use device::{Aps2, ResetMode, RunMode, TriggerSource};
pub use link_list::LinkListBank;
pub use status::StatusBank;
