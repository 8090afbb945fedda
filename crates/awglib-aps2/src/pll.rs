//! Clock PLL programming and channel clock synchronization.
//!
//! The clock PLL feeds one DAC clock per channel. After power-up or a
//! rate change the two DAC clocks can come up in either phase relative to
//! the FPGA reference, so the device exposes lock flags, a global phase
//! XOR flag and a phase counter per channel. [`synchronize`] walks those
//! indicators through a fixed sequence of stages:
//!
//! 1. wait for every PLL to report lock;
//! 2. coarse alignment: sample the global XOR flag and both channel phases,
//!    power-cycling the clock outputs of misaligned channels;
//! 3. fine alignment: reset each channel PLL until its phase is near zero.
//!
//! An attempt that ends with either channel unaligned is retried from
//! stage 1 until the retry budget is spent.

use std::time::Duration;

use awglib_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::chip_config::{SpiDevice, SpiWrite, pll_message};
use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::registers::{
    CSR_ADDR, CSR_CHA_PLL_RESET, CSR_CHB_PLL_RESET, PHASE_COUNT_A_ADDR, PHASE_COUNT_B_ADDR,
    PLL_02_LOCK_BIT, PLL_13_LOCK_BIT, PLL_ALL_LOCK_MASK, PLL_BYPASS_ADDR, PLL_BYPASS_BIT,
    PLL_CAL_ADDR, PLL_CYCLES_ADDR, PLL_GLOBAL_XOR_BIT, PLL_INIT, PLL_OUT_POWER_DOWN,
    PLL_OUT0_ADDR, PLL_OUT1_ADDR, PLL_STATUS_ADDR, PLL_UPDATE_ADDR,
};

/// Global XOR samples taken per coarse alignment check.
pub const XOR_SAMPLES: u32 = 20;
/// Fewer XOR hits than this counts as globally aligned.
pub const XOR_LOW_CUTOFF: u32 = 5;
/// A phase within this many degrees of 0 is aligned.
pub const LOW_PHASE_CUTOFF: f64 = 45.0;
/// A phase beyond this many degrees (near 180) is coarsely aligned.
pub const HIGH_PHASE_CUTOFF: f64 = 135.0;
/// Alignment checks per stage before giving up on that stage.
pub const MAX_PHASE_TESTS: u32 = 40;

/// Sampling rates the PLL dividers can produce, in MHz.
pub const SUPPORTED_RATES: [u32; 4] = [1200, 600, 300, 200];

/// Bounds for [`synchronize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Extra full attempts after the first one fails.
    pub retries: u32,
    /// Lock polls before a wait gives up.
    pub lock_poll_limit: u32,
    /// Sleep between lock polls.
    pub lock_poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            retries: 2,
            lock_poll_limit: 20,
            lock_poll_interval: Duration::from_millis(1),
        }
    }
}

/// One channel's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelClock {
    A,
    B,
}

impl ChannelClock {
    const ALL: [ChannelClock; 2] = [ChannelClock::A, ChannelClock::B];

    fn phase_addr(self) -> u32 {
        match self {
            ChannelClock::A => PHASE_COUNT_A_ADDR,
            ChannelClock::B => PHASE_COUNT_B_ADDR,
        }
    }

    fn lock_mask(self) -> u32 {
        match self {
            ChannelClock::A => 1 << PLL_02_LOCK_BIT,
            ChannelClock::B => 1 << PLL_13_LOCK_BIT,
        }
    }

    fn reset_mask(self) -> u32 {
        match self {
            ChannelClock::A => CSR_CHA_PLL_RESET,
            ChannelClock::B => CSR_CHB_PLL_RESET,
        }
    }

    fn output_addr(self) -> u16 {
        match self {
            ChannelClock::A => PLL_OUT0_ADDR,
            ChannelClock::B => PLL_OUT1_ADDR,
        }
    }
}

/// Convert a 9-bit phase counter to degrees in (-180, 180].
pub fn phase_degrees(raw: u32) -> f64 {
    let mut count = (raw & 0x1FF) as i32;
    if count > 256 {
        count -= 512;
    }
    f64::from(count) * 180.0 / 256.0
}

fn near_zero(phase: f64) -> bool {
    phase.abs() < LOW_PHASE_CUTOFF
}

fn near_zero_or_half_turn(phase: f64) -> bool {
    near_zero(phase) || phase.abs() > HIGH_PHASE_CUTOFF
}

// ---------------------------------------------------------------------------
// Sampling rate
// ---------------------------------------------------------------------------

/// Divider settings `(cycles, bypass)` for a sampling rate in MHz.
fn divider_for_rate(mhz: u32) -> Result<(u8, u8)> {
    match mhz {
        1200 => Ok((0x00, PLL_BYPASS_BIT)),
        600 => Ok((0x00, 0x00)),
        300 => Ok((0x11, 0x00)),
        200 => Ok((0x22, 0x00)),
        _ => Err(Error::InvalidParameter(format!(
            "unsupported sampling rate {mhz} MHz (supported: {SUPPORTED_RATES:?})"
        ))),
    }
}

/// Decode divider registers back to a sampling rate in MHz.
pub fn rate_from_dividers(cycles: u8, bypass: u8) -> Result<u32> {
    if bypass & PLL_BYPASS_BIT != 0 && cycles == 0 {
        return Ok(1200);
    }
    match cycles {
        0xEE => Ok(40),
        0xBB => Ok(50),
        0x55 => Ok(100),
        0x22 => Ok(200),
        0x11 => Ok(300),
        0x00 => Ok(600),
        _ => Err(Error::Protocol(format!(
            "unrecognized PLL divider setting {cycles:#04x}/{bypass:#04x}"
        ))),
    }
}

/// Program the DAC clock dividers for `mhz` and recalibrate the VCO.
pub async fn set_sampling_rate(engine: &mut Engine, mhz: u32) -> Result<()> {
    let (cycles, bypass) = divider_for_rate(mhz)?;
    let msg = pll_message(&[
        SpiWrite::new(PLL_CYCLES_ADDR, cycles),
        SpiWrite::new(PLL_BYPASS_ADDR, bypass),
        SpiWrite::new(PLL_CAL_ADDR, 0x71),
        SpiWrite::new(PLL_UPDATE_ADDR, 0x01),
        SpiWrite::new(PLL_CAL_ADDR, 0x70),
        SpiWrite::new(PLL_UPDATE_ADDR, 0x01),
    ]);
    engine.write_config(&msg).await?;
    info!(device = %engine.device(), mhz, "Sampling rate set");
    Ok(())
}

/// Read the DAC clock dividers and return the sampling rate in MHz.
pub async fn sampling_rate(engine: &mut Engine) -> Result<u32> {
    let cycles = engine.read_config(SpiDevice::Pll, PLL_CYCLES_ADDR).await?;
    let bypass = engine.read_config(SpiDevice::Pll, PLL_BYPASS_ADDR).await?;
    rate_from_dividers(cycles, bypass)
}

/// Load the boot-time PLL programming table.
pub async fn setup_pll(engine: &mut Engine) -> Result<()> {
    engine.write_config(&pll_message(PLL_INIT)).await?;
    debug!(device = %engine.device(), "PLL programmed");
    Ok(())
}

/// Whether every PLL currently reports lock.
pub async fn is_locked(engine: &mut Engine) -> Result<bool> {
    let status = engine.read_register(PLL_STATUS_ADDR).await?;
    Ok(status & PLL_ALL_LOCK_MASK == PLL_ALL_LOCK_MASK)
}

// ---------------------------------------------------------------------------
// Synchronization
// ---------------------------------------------------------------------------

/// Poll the PLL status until every bit in `mask` is set.
async fn wait_for_lock(engine: &mut Engine, config: &SyncConfig, mask: u32) -> Result<Outcome<()>> {
    for _ in 0..config.lock_poll_limit {
        let status = engine.read_register(PLL_STATUS_ADDR).await?;
        if status & mask == mask {
            return Ok(Outcome::Converged(()));
        }
        tokio::time::sleep(config.lock_poll_interval).await;
    }
    Ok(Outcome::Exhausted)
}

/// Wait for lock where running out of polls is fatal.
async fn require_lock(engine: &mut Engine, config: &SyncConfig, mask: u32, what: &str) -> Result<()> {
    match wait_for_lock(engine, config, mask).await? {
        Outcome::Converged(()) => Ok(()),
        Outcome::Retry | Outcome::Exhausted => Err(Error::CalibrationTimeout(format!(
            "{what} did not relock within {} polls",
            config.lock_poll_limit
        ))),
    }
}

async fn read_phase(engine: &mut Engine, clock: ChannelClock) -> Result<f64> {
    let raw = engine.read_register(clock.phase_addr()).await?;
    Ok(phase_degrees(raw))
}

/// Count global XOR hits over [`XOR_SAMPLES`] status reads.
async fn sample_global_phase(engine: &mut Engine) -> Result<u32> {
    let mut hits = 0;
    for _ in 0..XOR_SAMPLES {
        let status = engine.read_register(PLL_STATUS_ADDR).await?;
        hits += (status >> PLL_GLOBAL_XOR_BIT) & 0x1;
    }
    Ok(hits)
}

/// Power-cycle one channel's clock output and wait for relock.
async fn restart_output(engine: &mut Engine, config: &SyncConfig, clock: ChannelClock) -> Result<()> {
    let addr = clock.output_addr();
    engine
        .write_config(&pll_message(&[
            SpiWrite::new(addr, PLL_OUT_POWER_DOWN),
            SpiWrite::new(PLL_UPDATE_ADDR, 0x01),
            SpiWrite::new(addr, 0x00),
            SpiWrite::new(PLL_UPDATE_ADDR, 0x01),
        ]))
        .await?;
    require_lock(engine, config, PLL_ALL_LOCK_MASK, "clock output").await
}

/// Stage 2: coarse alignment of both channels to 0 or 180 degrees.
async fn coarse_align(engine: &mut Engine, config: &SyncConfig) -> Result<Outcome<()>> {
    for test in 0..MAX_PHASE_TESTS {
        let xor_hits = sample_global_phase(engine).await?;
        let phase_a = read_phase(engine, ChannelClock::A).await?;
        let phase_b = read_phase(engine, ChannelClock::B).await?;
        debug!(test, xor_hits, phase_a, phase_b, "Coarse phase check");

        let a_ok = near_zero_or_half_turn(phase_a);
        let b_ok = near_zero_or_half_turn(phase_b);
        if xor_hits < XOR_LOW_CUTOFF && a_ok && b_ok {
            return Ok(Outcome::Converged(()));
        }

        // A is the reference. With both channels in window a high XOR count
        // means they sit half a turn apart, so only B moves.
        let restart: &[ChannelClock] = match (a_ok, b_ok) {
            (true, _) => &[ChannelClock::B],
            (false, true) => &[ChannelClock::A],
            (false, false) => &[ChannelClock::A, ChannelClock::B],
        };
        debug!(
            test,
            a_in_window = a_ok,
            b_in_window = b_ok,
            restart = ?restart,
            "Restarting clock outputs"
        );
        for clock in restart {
            restart_output(engine, config, *clock).await?;
        }
    }
    Ok(Outcome::Exhausted)
}

/// Stage 3: reset one channel's PLL until its phase is near zero.
async fn fine_align(engine: &mut Engine, config: &SyncConfig, clock: ChannelClock) -> Result<Outcome<()>> {
    for _ in 0..MAX_PHASE_TESTS {
        let phase = read_phase(engine, clock).await?;
        if near_zero(phase) {
            debug!(channel = ?clock, phase, "Channel clock aligned");
            return Ok(Outcome::Converged(()));
        }
        engine
            .set_register_bits(CSR_ADDR, clock.reset_mask())
            .await?;
        engine
            .clear_register_bits(CSR_ADDR, clock.reset_mask())
            .await?;
        require_lock(engine, config, clock.lock_mask(), "channel PLL").await?;
    }
    Ok(Outcome::Exhausted)
}

/// One full pass through all stages.
async fn attempt(engine: &mut Engine, config: &SyncConfig) -> Result<Outcome<()>> {
    if !wait_for_lock(engine, config, PLL_ALL_LOCK_MASK)
        .await?
        .is_converged()
    {
        warn!(device = %engine.device(), "PLLs did not lock");
        return Ok(Outcome::Retry);
    }

    if !coarse_align(engine, config).await?.is_converged() {
        warn!(device = %engine.device(), "Coarse alignment did not settle, continuing");
    }

    let mut aligned = true;
    for clock in ChannelClock::ALL {
        if !fine_align(engine, config, clock).await?.is_converged() {
            warn!(device = %engine.device(), channel = ?clock, "Channel clock not aligned");
            aligned = false;
        }
    }

    Ok(if aligned {
        Outcome::Converged(())
    } else {
        Outcome::Retry
    })
}

/// Synchronize both channel clocks to the reference.
///
/// Returns the number of attempts used. Fails with
/// [`Error::SyncFailure`] once `config.retries + 1` attempts have failed,
/// or with [`Error::CalibrationTimeout`] if a PLL does not relock after a
/// reset.
pub async fn synchronize(engine: &mut Engine, config: &SyncConfig) -> Result<u32> {
    let attempts = config.retries + 1;
    for n in 1..=attempts {
        debug!(device = %engine.device(), attempt = n, "Synchronizing clocks");
        if attempt(engine, config).await?.is_converged() {
            info!(device = %engine.device(), attempts = n, "Clocks synchronized");
            return Ok(n);
        }
        warn!(
            device = %engine.device(),
            attempt = n,
            remaining = attempts - n,
            "Clock synchronization attempt failed"
        );
    }
    Err(Error::SyncFailure { attempts })
}
