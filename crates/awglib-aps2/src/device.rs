//! Aps2 -- a session with one APS2 waveform generator.
//!
//! This module ties the protocol layers ([`engine`](crate::engine),
//! [`chip_config`](crate::chip_config), [`dac`](crate::dac),
//! [`pll`](crate::pll)) to per-channel state to produce the operations an
//! application drives: bring-up, waveform and link-list upload, trigger
//! configuration and playback control.
//!
//! A session takes `&mut self` for every exchange, so one session never has
//! two requests in flight. Callers sharing a device between tasks wrap the
//! session in their own lock.

use std::sync::Arc;

use awglib_core::{DeviceId, Error, Result, Transport};
use tracing::{debug, info, warn};

use crate::chip_config::{end_of_list, pll_message, vcxo_message};
use crate::channel::{Channel, WF_MODULUS, WaveformState, pack_samples};
use crate::dac::{self, Dac, DacCalibration};
use crate::engine::{Engine, fragment};
use crate::link_list::LinkListBank;
use crate::packet::{Command, Opcode};
use crate::pll::{self, SyncConfig};
use crate::registers::{
    CACHE_CONTROL_ADDR, CSR_ADDR, CSR_CHA_ENABLE, CSR_CHA_RUN_MODE, CSR_CHB_ENABLE,
    CSR_CHB_RUN_MODE, CSR_TRIGGER_INTERNAL, LL_CHANNEL_STRIDE, MEMORY_ADDR, PLL_INIT,
    SEQ_CONTROL_ADDR, SEQ_CONTROL_RUN, SEQ_OFFSET, SEQ_OFFSET_ADDR, TRIGGER_INTERVAL_ADDR,
    VCXO_INIT, WFA_OFFSET, WFA_OFFSET_ADDR, WFB_OFFSET, WFB_OFFSET_ADDR,
};
use crate::status::{APS_STATUS_HOST, STATUS_WORDS, StatusBank};

/// Number of analog output channels.
pub const NUM_CHANNELS: usize = 2;

/// FPGA image packets sent between acknowledgements.
pub const FPGA_ACK_GROUP: usize = 20;

/// Trigger interval register value used to hold off triggers while stopping.
const SLOW_TRIGGER_CYCLES: u32 = u32::MAX;

/// Device reset variants carried in the RESET command's mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetMode {
    /// Restart the user logic without reloading the FPGA.
    Soft = 0x0,
    /// Reconfigure the FPGA from the user image.
    UserImage = 0x1,
    /// Reconfigure the FPGA from the base image.
    BaseImage = 0x2,
}

/// Where playback triggers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Internal,
    External,
}

/// What a channel plays when triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Its link list.
    Sequence,
    /// Its waveform memory, end to end.
    Waveform,
}

fn check_channel(channel: usize) -> Result<usize> {
    if channel < NUM_CHANNELS {
        Ok(channel)
    } else {
        Err(Error::InvalidParameter(format!(
            "channel {channel} out of range (device has {NUM_CHANNELS})"
        )))
    }
}

fn waveform_addr(channel: usize) -> u32 {
    if channel == 0 {
        MEMORY_ADDR + WFA_OFFSET
    } else {
        MEMORY_ADDR + WFB_OFFSET
    }
}

fn link_list_addr(channel: usize) -> u32 {
    MEMORY_ADDR + SEQ_OFFSET + LL_CHANNEL_STRIDE * channel as u32
}

fn enable_mask(channel: usize) -> u32 {
    if channel == 0 { CSR_CHA_ENABLE } else { CSR_CHB_ENABLE }
}

fn run_mode_mask(channel: usize) -> u32 {
    if channel == 0 { CSR_CHA_RUN_MODE } else { CSR_CHB_RUN_MODE }
}

/// Pack an FPGA image into big-endian words, padded to an even count.
pub fn fpga_image_words(image: &[u8]) -> Vec<u32> {
    let mut words: Vec<u32> = image
        .chunks(4)
        .map(|chunk| {
            let mut bytes = [0xFF; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(bytes)
        })
        .collect();
    if words.len() % 2 != 0 {
        words.push(0xFFFF_FFFF);
    }
    words
}

/// A session with one APS2.
///
/// Constructed via [`Aps2Builder`](crate::builder::Aps2Builder).
pub struct Aps2 {
    engine: Engine,
    channels: [Channel; NUM_CHANNELS],
    sampling_rate: Option<u32>,
    sync_config: SyncConfig,
}

impl Aps2 {
    pub(crate) fn new(transport: Arc<dyn Transport>, device: DeviceId, sync_config: SyncConfig) -> Self {
        Aps2 {
            engine: Engine::new(transport, device),
            channels: [Channel::new(0), Channel::new(1)],
            sampling_rate: None,
            sync_config,
        }
    }

    pub fn device(&self) -> &DeviceId {
        self.engine.device()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// The last sampling rate read from or written to the device, in MHz.
    pub fn cached_sampling_rate(&self) -> Option<u32> {
        self.sampling_rate
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync_config
    }

    pub fn channel(&self, channel: usize) -> Result<&Channel> {
        Ok(&self.channels[check_channel(channel)?])
    }

    // -----------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------

    pub async fn connect(&mut self) -> Result<()> {
        self.engine.transport().connect(self.engine.device()).await?;
        info!(device = %self.device(), "Connected");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.engine
            .transport()
            .disconnect(self.engine.device())
            .await?;
        self.sampling_rate = None;
        info!(device = %self.device(), "Disconnected");
        Ok(())
    }

    /// Reset the device. No reply is sent; the device drops off the
    /// network while it restarts.
    pub async fn reset(&mut self, mode: ResetMode) -> Result<()> {
        info!(device = %self.device(), mode = ?mode, "Resetting device");
        self.engine
            .write_command(Command::new(Opcode::Reset).mode(mode as u8), 0)
            .await?;
        self.sampling_rate = None;
        Ok(())
    }

    pub async fn read_status(&mut self) -> Result<StatusBank> {
        let reply = self
            .engine
            .query(
                Command::new(Opcode::Status)
                    .read(STATUS_WORDS as u16)
                    .mode(APS_STATUS_HOST),
                0,
            )
            .await?;
        StatusBank::from_words(&reply.payload)
    }

    /// Device uptime in seconds.
    pub async fn uptime(&mut self) -> Result<f64> {
        Ok(self.read_status().await?.uptime())
    }

    /// Version word of the running user firmware.
    pub async fn firmware_version(&mut self) -> Result<u32> {
        Ok(self.read_status().await?.user_firmware_version)
    }

    // -----------------------------------------------------------------
    // Firmware and boot configuration
    // -----------------------------------------------------------------

    /// Stream an FPGA image to `addr` and select it for the next boot.
    pub async fn program_fpga(&mut self, image: &[u8], addr: u32) -> Result<()> {
        let words = fpga_image_words(image);
        let packets = fragment(Command::new(Opcode::FpgaConfig), addr, &words)?;
        info!(
            device = %self.device(),
            bytes = image.len(),
            packets = packets.len(),
            "Programming FPGA image"
        );
        self.engine.send_packets(packets, FPGA_ACK_GROUP).await?;
        self.select_fpga_image(addr).await
    }

    pub async fn select_fpga_image(&mut self, addr: u32) -> Result<()> {
        debug!(device = %self.device(), addr = format_args!("{addr:#010x}"), "Selecting FPGA image");
        self.engine
            .write_command(Command::new(Opcode::FpgaConfigCtrl), addr)
            .await
    }

    /// Run the chip configuration stored in flash at `addr`; returns the
    /// device's status byte.
    pub async fn run_chip_config(&mut self, addr: u32) -> Result<u8> {
        let reply = self
            .engine
            .query(Command::new(Opcode::RunChipConfig), addr)
            .await?;
        debug!(device = %self.device(), status = reply.command.mode_stat, "Chip configuration ran");
        Ok(reply.command.mode_stat)
    }

    /// Store the VCXO and PLL boot tables in flash at address 0.
    pub async fn write_spi_setup(&mut self) -> Result<()> {
        let mut words = vcxo_message(VCXO_INIT)?;
        words.extend(pll_message(PLL_INIT));
        words.push(end_of_list());
        self.engine.write_flash(0, &words).await?;
        info!(device = %self.device(), words = words.len(), "SPI boot table written");
        Ok(())
    }

    pub async fn setup_vcxo(&mut self) -> Result<()> {
        self.engine.write_config(&vcxo_message(VCXO_INIT)?).await
    }

    pub async fn setup_pll(&mut self) -> Result<()> {
        pll::setup_pll(&mut self.engine).await
    }

    // -----------------------------------------------------------------
    // Clocks and DACs
    // -----------------------------------------------------------------

    /// Bring the device to a known state.
    ///
    /// When `force` is set or the PLLs are not locked, the channel clocks
    /// are synchronized, both DACs calibrated and channel memory cleared.
    /// The sampling rate is read back either way.
    pub async fn init(&mut self, force: bool) -> Result<()> {
        let locked = pll::is_locked(&mut self.engine).await?;
        if force || !locked {
            info!(device = %self.device(), force, locked, "Initializing device");
            self.synchronize_clocks().await?;
            self.setup_dacs().await?;
            self.clear_channel_data().await?;
            self.write_memory_map().await?;
        } else {
            debug!(device = %self.device(), "PLLs locked, skipping initialization");
        }
        self.sampling_rate().await?;
        Ok(())
    }

    /// Synchronize both channel clocks; returns the attempts used.
    pub async fn synchronize_clocks(&mut self) -> Result<u32> {
        pll::synchronize(&mut self.engine, &self.sync_config).await
    }

    /// Set the sampling rate in MHz and resynchronize the clocks.
    ///
    /// Does nothing if the device is already known to run at `mhz`.
    pub async fn set_sampling_rate(&mut self, mhz: u32) -> Result<()> {
        if self.sampling_rate == Some(mhz) {
            debug!(device = %self.device(), mhz, "Sampling rate unchanged");
            return Ok(());
        }
        pll::set_sampling_rate(&mut self.engine, mhz).await?;
        self.sampling_rate = None;
        self.synchronize_clocks().await?;
        self.sampling_rate = Some(mhz);
        Ok(())
    }

    /// Read the sampling rate from the PLL dividers, in MHz.
    pub async fn sampling_rate(&mut self) -> Result<u32> {
        let mhz = pll::sampling_rate(&mut self.engine).await?;
        self.sampling_rate = Some(mhz);
        Ok(mhz)
    }

    pub async fn setup_dac(&mut self, dac: usize) -> Result<DacCalibration> {
        dac::calibrate(&mut self.engine, Dac::from_index(dac)?).await
    }

    pub async fn setup_dacs(&mut self) -> Result<[DacCalibration; 2]> {
        let first = self.setup_dac(0).await?;
        let second = self.setup_dac(1).await?;
        if first.degraded || second.degraded {
            warn!(device = %self.device(), "DAC calibration degraded");
        }
        Ok([first, second])
    }

    /// Enable FIFO sync on `dac` and return its FIFO phase.
    pub async fn enable_dac_fifo(&mut self, dac: usize) -> Result<u8> {
        dac::enable_fifo(&mut self.engine, Dac::from_index(dac)?).await
    }

    pub async fn disable_dac_fifo(&mut self, dac: usize) -> Result<()> {
        dac::disable_fifo(&mut self.engine, Dac::from_index(dac)?).await
    }

    // -----------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------

    pub fn channel_offset(&self, channel: usize) -> Result<f32> {
        Ok(self.channel(channel)?.offset())
    }

    pub fn channel_scale(&self, channel: usize) -> Result<f32> {
        Ok(self.channel(channel)?.scale())
    }

    pub fn channel_enabled(&self, channel: usize) -> Result<bool> {
        Ok(self.channel(channel)?.enabled())
    }

    /// Set a channel's offset; a staged waveform is re-uploaded.
    pub async fn set_channel_offset(&mut self, channel: usize, offset: f32) -> Result<()> {
        let ch = check_channel(channel)?;
        self.channels[ch].set_offset(offset)?;
        self.upload_waveform(ch).await
    }

    /// Set a channel's scale; a staged waveform is re-uploaded.
    pub async fn set_channel_scale(&mut self, channel: usize, scale: f32) -> Result<()> {
        let ch = check_channel(channel)?;
        self.channels[ch].set_scale(scale)?;
        self.upload_waveform(ch).await
    }

    pub async fn set_channel_enabled(&mut self, channel: usize, enabled: bool) -> Result<()> {
        let ch = check_channel(channel)?;
        if enabled {
            self.engine.set_register_bits(CSR_ADDR, enable_mask(ch)).await?;
        } else {
            self.engine.clear_register_bits(CSR_ADDR, enable_mask(ch)).await?;
        }
        self.channels[ch].set_enabled(enabled);
        Ok(())
    }

    /// Load normalized samples in [-1, 1] and upload them.
    pub async fn set_waveform(&mut self, channel: usize, samples: &[f32]) -> Result<()> {
        let ch = check_channel(channel)?;
        self.channels[ch].set_waveform(samples)?;
        self.upload_waveform(ch).await
    }

    /// Load DAC codes in [-8191, 8191] and upload them.
    pub async fn set_waveform_codes(&mut self, channel: usize, codes: &[i16]) -> Result<()> {
        let ch = check_channel(channel)?;
        self.channels[ch].set_waveform_codes(codes)?;
        self.upload_waveform(ch).await
    }

    /// Upload a channel's prepared waveform if its device copy is stale.
    async fn upload_waveform(&mut self, ch: usize) -> Result<()> {
        if self.channels[ch].state() != WaveformState::Dirty {
            return Ok(());
        }
        let words = self.channels[ch].packed_waveform();
        debug!(device = %self.device(), channel = ch, words = words.len(), "Uploading waveform");
        self.engine.write_register(CACHE_CONTROL_ADDR, 0).await?;
        self.engine.write_memory(waveform_addr(ch), &words).await?;
        self.engine.write_register(CACHE_CONTROL_ADDR, 1).await?;
        self.channels[ch].mark_uploaded();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Sequencing
    // -----------------------------------------------------------------

    /// Install a link-list bank on a channel and write it to the device.
    pub async fn load_link_list(&mut self, channel: usize, bank: LinkListBank) -> Result<()> {
        let ch = check_channel(channel)?;
        let words = pack_samples(&bank.pack());
        self.channels[ch].set_bank(bank);
        debug!(device = %self.device(), channel = ch, words = words.len(), "Writing link list");
        self.engine.write_memory(link_list_addr(ch), &words).await
    }

    /// Write entries `start..stop` of the channel's bank to the start of its
    /// link-list memory. `stop < start` wraps around the end of the bank.
    pub async fn write_link_list_slice(&mut self, channel: usize, start: usize, stop: usize) -> Result<()> {
        let ch = check_channel(channel)?;
        let words = pack_samples(&self.channels[ch].bank().slice(start, stop)?);
        self.engine.write_memory(link_list_addr(ch), &words).await
    }

    /// Drop every channel's waveform and link list and zero the start of
    /// waveform memory.
    pub async fn clear_channel_data(&mut self) -> Result<()> {
        let zeros = vec![0u32; WF_MODULUS / 2];
        for ch in 0..NUM_CHANNELS {
            self.channels[ch].clear();
            self.engine.write_memory(waveform_addr(ch), &zeros).await?;
        }
        debug!(device = %self.device(), "Channel data cleared");
        Ok(())
    }

    /// Point the playback engines at the waveform and sequence regions.
    pub async fn write_memory_map(&mut self) -> Result<()> {
        self.engine
            .write_register(WFA_OFFSET_ADDR, MEMORY_ADDR + WFA_OFFSET)
            .await?;
        self.engine
            .write_register(WFB_OFFSET_ADDR, MEMORY_ADDR + WFB_OFFSET)
            .await?;
        self.engine
            .write_register(SEQ_OFFSET_ADDR, MEMORY_ADDR + SEQ_OFFSET)
            .await
    }

    pub async fn set_run_mode(&mut self, channel: usize, mode: RunMode) -> Result<()> {
        let mask = run_mode_mask(check_channel(channel)?);
        match mode {
            RunMode::Sequence => self.engine.set_register_bits(CSR_ADDR, mask).await,
            RunMode::Waveform => self.engine.clear_register_bits(CSR_ADDR, mask).await,
        }
    }

    // -----------------------------------------------------------------
    // Triggers and playback
    // -----------------------------------------------------------------

    pub async fn set_trigger_source(&mut self, source: TriggerSource) -> Result<()> {
        match source {
            TriggerSource::Internal => {
                self.engine
                    .set_register_bits(CSR_ADDR, CSR_TRIGGER_INTERNAL)
                    .await
            }
            TriggerSource::External => {
                self.engine
                    .clear_register_bits(CSR_ADDR, CSR_TRIGGER_INTERNAL)
                    .await
            }
        }
    }

    pub async fn trigger_source(&mut self) -> Result<TriggerSource> {
        let csr = self.engine.read_register(CSR_ADDR).await?;
        Ok(if csr & CSR_TRIGGER_INTERNAL != 0 {
            TriggerSource::Internal
        } else {
            TriggerSource::External
        })
    }

    async fn known_sampling_rate(&mut self) -> Result<u32> {
        match self.sampling_rate {
            Some(mhz) => Ok(mhz),
            None => self.sampling_rate().await,
        }
    }

    /// Set the internal trigger period in seconds.
    pub async fn set_trigger_interval(&mut self, seconds: f64) -> Result<()> {
        let mhz = self.known_sampling_rate().await?;
        let cycles = (seconds * 0.25 * f64::from(mhz) * 1e6).round() - 2.0;
        if !cycles.is_finite() || cycles < 0.0 || cycles > f64::from(u32::MAX) {
            return Err(Error::InvalidParameter(format!(
                "trigger interval {seconds} s out of range at {mhz} MHz"
            )));
        }
        debug!(device = %self.device(), seconds, cycles, "Setting trigger interval");
        self.engine
            .write_register(TRIGGER_INTERVAL_ADDR, cycles as u32)
            .await
    }

    /// The internal trigger period in seconds.
    pub async fn trigger_interval(&mut self) -> Result<f64> {
        let mhz = self.known_sampling_rate().await?;
        let cycles = self.engine.read_register(TRIGGER_INTERVAL_ADDR).await?;
        Ok((f64::from(cycles) + 2.0) / (0.25 * f64::from(mhz) * 1e6))
    }

    pub async fn run(&mut self) -> Result<()> {
        info!(device = %self.device(), "Starting playback");
        self.engine
            .set_register_bits(SEQ_CONTROL_ADDR, SEQ_CONTROL_RUN)
            .await
    }

    /// Halt playback.
    ///
    /// Triggers are switched to a slow internal source while the engines
    /// stop, then the previous trigger source and interval are restored.
    pub async fn stop(&mut self) -> Result<()> {
        let csr = self.engine.read_register(CSR_ADDR).await?;
        let interval = self.engine.read_register(TRIGGER_INTERVAL_ADDR).await?;

        self.engine
            .write_register(TRIGGER_INTERVAL_ADDR, SLOW_TRIGGER_CYCLES)
            .await?;
        self.engine
            .write_register(CSR_ADDR, csr | CSR_TRIGGER_INTERNAL)
            .await?;
        self.engine
            .clear_register_bits(SEQ_CONTROL_ADDR, SEQ_CONTROL_RUN)
            .await?;

        self.engine.write_register(CSR_ADDR, csr).await?;
        self.engine
            .write_register(TRIGGER_INTERVAL_ADDR, interval)
            .await?;
        info!(device = %self.device(), "Playback stopped");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Raw memory and flash
    // -----------------------------------------------------------------

    pub async fn write_memory(&mut self, addr: u32, words: &[u32]) -> Result<()> {
        self.engine.write_memory(addr, words).await
    }

    pub async fn read_memory(&mut self, addr: u32, count: usize) -> Result<Vec<u32>> {
        self.engine.read_memory(addr, count).await
    }

    pub async fn read_memory_chunked(&mut self, addr: u32, count: usize) -> Result<Vec<u32>> {
        self.engine.read_memory_chunked(addr, count).await
    }

    pub async fn erase_flash(&mut self, addr: u32, num_bytes: u32) -> Result<()> {
        self.engine.erase_flash(addr, num_bytes).await
    }

    pub async fn write_flash(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        self.engine.write_flash(addr, data).await
    }

    pub async fn read_flash(&mut self, addr: u32, count: usize) -> Result<Vec<u32>> {
        self.engine.read_flash(addr, count).await
    }
}

impl std::fmt::Debug for Aps2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aps2")
            .field("device", self.engine.device())
            .field("sampling_rate", &self.sampling_rate)
            .finish_non_exhaustive()
    }
}
