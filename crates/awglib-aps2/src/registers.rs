//! APS2 address map, register bits and boot-time configuration tables.
//!
//! Addresses are byte addresses in the device's memory-mapped user space.
//! The layout is fixed by the firmware and changes only with it.

use crate::chip_config::SpiWrite;

// ---------------------------------------------------------------------------
// Memory regions
// ---------------------------------------------------------------------------

pub const MEMORY_ADDR: u32 = 0x0000_0000;
/// Channel A waveform memory, relative to [`MEMORY_ADDR`].
pub const WFA_OFFSET: u32 = 0x0000_0000;
/// Channel B waveform memory, relative to [`MEMORY_ADDR`].
pub const WFB_OFFSET: u32 = 0x0800_0000;
/// Sequence (link-list) memory, relative to [`MEMORY_ADDR`].
pub const SEQ_OFFSET: u32 = 0x1000_0000;
/// Distance between the two channels' link-list regions.
pub const LL_CHANNEL_STRIDE: u32 = 0x0400_0000;

// ---------------------------------------------------------------------------
// Control/status registers
// ---------------------------------------------------------------------------

pub const CSR_BASE: u32 = 0x44A0_0000;
pub const CSR_ADDR: u32 = CSR_BASE;
pub const SEQ_CONTROL_ADDR: u32 = CSR_BASE + 0x04;
pub const CACHE_CONTROL_ADDR: u32 = CSR_BASE + 0x08;
pub const WFA_OFFSET_ADDR: u32 = CSR_BASE + 0x0C;
pub const WFB_OFFSET_ADDR: u32 = CSR_BASE + 0x10;
pub const SEQ_OFFSET_ADDR: u32 = CSR_BASE + 0x14;
pub const TRIGGER_INTERVAL_ADDR: u32 = CSR_BASE + 0x18;
pub const PLL_STATUS_ADDR: u32 = CSR_BASE + 0x24;
pub const PHASE_COUNT_A_ADDR: u32 = CSR_BASE + 0x28;
pub const PHASE_COUNT_B_ADDR: u32 = CSR_BASE + 0x2C;

/// CSR bit: channel A plays its link list (clear: continuous waveform).
pub const CSR_CHA_RUN_MODE: u32 = 1 << 0;
pub const CSR_CHB_RUN_MODE: u32 = 1 << 1;
pub const CSR_CHA_ENABLE: u32 = 1 << 2;
pub const CSR_CHB_ENABLE: u32 = 1 << 3;
pub const CSR_CHA_PLL_RESET: u32 = 1 << 4;
pub const CSR_CHB_PLL_RESET: u32 = 1 << 5;
/// CSR bit: triggers are generated internally (clear: external input).
pub const CSR_TRIGGER_INTERNAL: u32 = 1 << 6;

/// Sequence control bit: playback engines running.
pub const SEQ_CONTROL_RUN: u32 = 1 << 0;

// ---------------------------------------------------------------------------
// PLL status register bits
// ---------------------------------------------------------------------------

pub const PLL_GLOBAL_XOR_BIT: u32 = 10;
pub const PLL_02_LOCK_BIT: u32 = 11;
pub const PLL_13_LOCK_BIT: u32 = 12;
pub const REFERENCE_PLL_LOCK_BIT: u32 = 13;

pub const PLL_ALL_LOCK_MASK: u32 =
    (1 << PLL_02_LOCK_BIT) | (1 << PLL_13_LOCK_BIT) | (1 << REFERENCE_PLL_LOCK_BIT);

// ---------------------------------------------------------------------------
// Clock PLL (SPI) registers
// ---------------------------------------------------------------------------

pub const PLL_CAL_ADDR: u16 = 0x18;
pub const PLL_OUT0_ADDR: u16 = 0xF0;
pub const PLL_OUT1_ADDR: u16 = 0xF1;
pub const PLL_CYCLES_ADDR: u16 = 0x190;
pub const PLL_BYPASS_ADDR: u16 = 0x191;
pub const PLL_UPDATE_ADDR: u16 = 0x232;

pub const PLL_BYPASS_BIT: u8 = 0x80;
/// Output control value that powers an output down.
pub const PLL_OUT_POWER_DOWN: u8 = 0x02;

// ---------------------------------------------------------------------------
// DAC (SPI) registers
// ---------------------------------------------------------------------------

pub const DAC_SYNC_ADDR: u16 = 0x0;
pub const DAC_INTERRUPT_ADDR: u16 = 0x1;
/// MSD[7:4] MHD[3:0]
pub const DAC_MSDMHD_ADDR: u16 = 0x4;
/// SD[7:4] CHECK[0]
pub const DAC_SD_ADDR: u16 = 0x5;
pub const DAC_CONTROLLER_ADDR: u16 = 0x6;
/// FIFO phase in bits 6:4.
pub const DAC_FIFO_STAT_ADDR: u16 = 0x7;

pub const DAC_SYNC_ENABLE_BIT: u8 = 1 << 2;
pub const DAC_SD_CHECK_BIT: u8 = 1 << 0;

// ---------------------------------------------------------------------------
// Boot tables
// ---------------------------------------------------------------------------

/// Clock PLL programming: 2.4 GHz VCO, 1.2 GHz DAC clocks, 300 MHz FPGA reference.
pub const PLL_INIT: &[SpiWrite] = &[
    SpiWrite::new(0x000, 0x99), // SDO active, long instruction
    SpiWrite::new(0x010, 0x7C), // PLL on, 4.8 mA charge pump
    SpiWrite::new(0x011, 0x05), // R = 5
    SpiWrite::new(0x014, 0x06), // B = 6
    SpiWrite::new(0x016, 0x05), // P = 16
    SpiWrite::new(0x017, 0x04),
    SpiWrite::new(0x018, 0x60), // VCO cal divider 2, lock detect 255
    SpiWrite::new(0x01A, 0x2D), // lock status on LD pin
    SpiWrite::new(0x01C, 0x07), // differential reference
    SpiWrite::new(0x0F0, 0x00),
    SpiWrite::new(0x0F1, 0x00),
    SpiWrite::new(0x0F2, 0x00),
    SpiWrite::new(0x0F3, 0x00),
    SpiWrite::new(0x0F4, 0x00),
    SpiWrite::new(0x0F5, 0x00),
    SpiWrite::new(0x190, 0x00),
    SpiWrite::new(0x191, 0x80), // bypass divider 0
    SpiWrite::new(0x193, 0x11), // 300 MHz FPGA clock
    SpiWrite::new(0x196, 0x00),
    SpiWrite::new(0x197, 0x80),
    SpiWrite::new(0x1E0, 0x00), // VCO post divide 2
    SpiWrite::new(0x1E1, 0x02),
    SpiWrite::new(0x232, 0x01),
    SpiWrite::new(0x018, 0x71), // start VCO calibration
    SpiWrite::new(0x232, 0x01),
    SpiWrite::new(0x018, 0x70),
    SpiWrite::new(0x232, 0x01),
];

/// VCXO programming bytes; length is a multiple of four.
pub const VCXO_INIT: &[u8] = &[0x08, 0x60, 0x00, 0x04, 0x64, 0x91, 0x00, 0x61];
