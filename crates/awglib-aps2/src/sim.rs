//! Simulated APS2 device for tests.
//!
//! Plugs into [`MockTransport`] as a responder and answers packets the way
//! the firmware does: a sparse memory map with the PLL status and CSR
//! side effects, SPI register files for both DACs and the clock PLL,
//! page-erased flash, and the status bank.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use awglib_test_harness::MockTransport;
use bytes::Bytes;

use crate::chip_config::{ConfigWord, Target};
use crate::flash::{EPROM_ERASE, EPROM_OPERATION_FAILED, FLASH_PAGE_BYTES};
use crate::packet::{Command, Opcode, Packet};
use crate::registers::{
    CSR_ADDR, CSR_CHA_PLL_RESET, CSR_CHB_PLL_RESET, DAC_MSDMHD_ADDR, DAC_SD_ADDR, DAC_SD_CHECK_BIT,
    PHASE_COUNT_A_ADDR, PHASE_COUNT_B_ADDR, PLL_ALL_LOCK_MASK, PLL_GLOBAL_XOR_BIT,
    PLL_OUT0_ADDR, PLL_OUT1_ADDR, PLL_OUT_POWER_DOWN, PLL_STATUS_ADDR,
};
use crate::status::STATUS_WORDS;

/// Sample-check function: `(dac, msd, mhd) -> check flag`.
pub type DacCheck = Box<dyn Fn(usize, u8, u8) -> bool + Send>;

pub struct SimDevice {
    pub memory: HashMap<u32, u32>,
    pub flash: HashMap<u32, u32>,
    pub dac_regs: [[u8; 32]; 2],
    pub pll_regs: HashMap<u16, u8>,
    pub vcxo_words: Vec<u32>,
    pub dac_check: DacCheck,
    pub status: [u32; STATUS_WORDS],
    pub fail_flash: bool,
    pub erased_pages: Vec<u32>,
    pub pll_locked: bool,
    pub global_xor: bool,
    pub reset_aligns_phase: bool,
    pub reset_drops_lock: bool,
    pub pll_resets: [usize; 2],
    pub output_restarts: [usize; 2],
    pub image: Vec<u32>,
    pub selected_image: Option<u32>,
    pub resets: Vec<u8>,
    pub chip_config_runs: Vec<u32>,
    pending_read: u8,
}

impl SimDevice {
    pub fn new() -> Self {
        SimDevice {
            memory: HashMap::new(),
            flash: HashMap::new(),
            dac_regs: [[0; 32]; 2],
            pll_regs: HashMap::new(),
            vcxo_words: Vec::new(),
            dac_check: Box::new(|_, msd, mhd| msd < 4 && mhd < 8),
            status: [0; STATUS_WORDS],
            fail_flash: false,
            erased_pages: Vec::new(),
            pll_locked: true,
            global_xor: false,
            reset_aligns_phase: false,
            reset_drops_lock: false,
            pll_resets: [0; 2],
            output_restarts: [0; 2],
            image: Vec::new(),
            selected_image: None,
            resets: Vec::new(),
            chip_config_runs: Vec::new(),
            pending_read: 0,
        }
    }

    /// Install a fresh simulated device as `mock`'s responder.
    pub fn attach(mock: &MockTransport) -> Arc<Mutex<SimDevice>> {
        let sim = Arc::new(Mutex::new(SimDevice::new()));
        let handle = sim.clone();
        mock.set_responder(move |_, data| handle.lock().unwrap().handle(data));
        sim
    }

    pub fn read_words(&self, addr: u32, count: usize) -> Vec<u32> {
        (0..count as u32)
            .map(|i| self.read_word(addr + 4 * i))
            .collect()
    }

    pub fn write_words(&mut self, addr: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            self.write_word(addr + 4 * i as u32, *word);
        }
    }

    pub fn read_flash_words(&self, addr: u32, count: usize) -> Vec<u32> {
        (0..count as u32)
            .map(|i| self.flash.get(&(addr + 4 * i)).copied().unwrap_or(0xFFFF_FFFF))
            .collect()
    }

    pub fn write_flash_words(&mut self, addr: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            self.flash.insert(addr + 4 * i as u32, *word);
        }
    }

    pub fn set_phase_counts(&mut self, a: u32, b: u32) {
        self.memory.insert(PHASE_COUNT_A_ADDR, a);
        self.memory.insert(PHASE_COUNT_B_ADDR, b);
    }

    fn read_word(&self, addr: u32) -> u32 {
        if addr == PLL_STATUS_ADDR {
            let mut status = if self.pll_locked { PLL_ALL_LOCK_MASK } else { 0 };
            if self.global_xor {
                status |= 1 << PLL_GLOBAL_XOR_BIT;
            }
            return status;
        }
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        if addr == CSR_ADDR {
            for (i, (mask, phase_addr)) in [
                (CSR_CHA_PLL_RESET, PHASE_COUNT_A_ADDR),
                (CSR_CHB_PLL_RESET, PHASE_COUNT_B_ADDR),
            ]
            .into_iter()
            .enumerate()
            {
                if value & mask != 0 {
                    self.pll_resets[i] += 1;
                    if self.reset_aligns_phase {
                        self.memory.insert(phase_addr, 0);
                    }
                    if self.reset_drops_lock {
                        self.pll_locked = false;
                    }
                }
            }
        }
        self.memory.insert(addr, value);
    }

    fn read_dac(&self, dac: usize, addr: usize) -> u8 {
        let reg = self.dac_regs[dac][addr];
        if addr == DAC_SD_ADDR as usize {
            let msdmhd = self.dac_regs[dac][DAC_MSDMHD_ADDR as usize];
            let check = (self.dac_check)(dac, msdmhd >> 4, msdmhd & 0xF);
            return (reg & 0xF0) | if check { DAC_SD_CHECK_BIT } else { 0 };
        }
        reg
    }

    fn run_config(&mut self, words: &[u32]) {
        let mut iter = words.iter();
        while let Some(word) = iter.next() {
            let cw = ConfigWord::from_word(*word);
            match cw.target {
                t if t == Target::EndOfList as u8 => break,
                t if t == Target::Dac0Single as u8 || t == Target::Dac1Single as u8 => {
                    let dac = usize::from(t == Target::Dac1Single as u8);
                    let addr = usize::from(cw.instr & 0x1F);
                    if cw.instr & 0x80 != 0 {
                        self.pending_read = self.read_dac(dac, addr);
                    } else {
                        self.dac_regs[dac][addr] = cw.spicnt_data;
                    }
                }
                t if t == Target::PllSingle as u8 => {
                    let addr = cw.instr & 0x1FFF;
                    if cw.instr & 0x8000 != 0 {
                        self.pending_read = self.pll_regs.get(&addr).copied().unwrap_or(0);
                    } else {
                        if cw.spicnt_data == PLL_OUT_POWER_DOWN {
                            match addr {
                                PLL_OUT0_ADDR => self.output_restarts[0] += 1,
                                PLL_OUT1_ADDR => self.output_restarts[1] += 1,
                                _ => {}
                            }
                        }
                        self.pll_regs.insert(addr, cw.spicnt_data);
                    }
                }
                t if t == Target::Vcxo as u8 => {
                    if let Some(data) = iter.next() {
                        self.vcxo_words.push(*data);
                    }
                }
                _ => {}
            }
        }
    }

    fn handle(&mut self, data: &[u8]) -> Vec<Bytes> {
        let request = Packet::decode(data).expect("simulated device got a malformed packet");
        let cmd = request.command;
        match cmd.opcode {
            Opcode::UserIo if cmd.read => {
                let words = self.read_words(request.addr, usize::from(cmd.count));
                vec![reply(&request, 0, words)]
            }
            Opcode::UserIo => {
                self.write_words(request.addr, &request.payload);
                vec![reply(&request, 0, Vec::new())]
            }
            Opcode::ChipConfigIo if cmd.read => {
                vec![reply(&request, 0, vec![u32::from(self.pending_read) << 24])]
            }
            Opcode::ChipConfigIo => {
                self.run_config(&request.payload);
                vec![reply(&request, 0, Vec::new())]
            }
            Opcode::EpromIo if cmd.read => {
                let words = self.read_flash_words(request.addr, usize::from(cmd.count));
                vec![reply(&request, 0, words)]
            }
            Opcode::EpromIo if cmd.mode_stat == EPROM_ERASE => {
                self.erased_pages.push(request.addr);
                let page = request.addr..request.addr + FLASH_PAGE_BYTES;
                self.flash.retain(|addr, _| !page.contains(addr));
                vec![reply(&request, self.flash_status(), Vec::new())]
            }
            Opcode::EpromIo => {
                self.write_flash_words(request.addr, &request.payload);
                vec![reply(&request, self.flash_status(), Vec::new())]
            }
            Opcode::Status => vec![reply(&request, 0, self.status.to_vec())],
            Opcode::FpgaConfig => {
                self.image.extend_from_slice(&request.payload);
                vec![reply(&request, 0, Vec::new())]
            }
            Opcode::FpgaConfigCtrl => {
                self.selected_image = Some(request.addr);
                Vec::new()
            }
            Opcode::Reset => {
                self.resets.push(cmd.mode_stat);
                Vec::new()
            }
            Opcode::RunChipConfig => {
                self.chip_config_runs.push(request.addr);
                vec![reply(&request, 0, Vec::new())]
            }
            Opcode::UserIoNack | Opcode::FpgaConfigNack => Vec::new(),
        }
    }

    fn flash_status(&self) -> u8 {
        if self.fail_flash { EPROM_OPERATION_FAILED } else { 0 }
    }
}

fn reply(request: &Packet, mode_stat: u8, payload: Vec<u32>) -> Bytes {
    let command = Command {
        mode_stat,
        count: if payload.is_empty() {
            request.command.count
        } else {
            payload.len() as u16
        },
        ..request.command
    };
    Packet {
        seq: request.seq,
        command,
        addr: request.addr,
        payload,
    }
    .encode()
}
