//! DAC timing calibration and FIFO control.
//!
//! The DAC samples its data bus inside a window set by a setup delay
//! (MSD) and a hold delay (MHD). Calibration sweeps each delay upward from
//! zero until the DAC's sample-check flag drops, then centers the sample
//! delay between the two edges.

use awglib_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::chip_config::SpiDevice;
use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::registers::{
    DAC_CONTROLLER_ADDR, DAC_FIFO_STAT_ADDR, DAC_MSDMHD_ADDR, DAC_SD_ADDR, DAC_SD_CHECK_BIT,
    DAC_SYNC_ADDR, DAC_SYNC_ENABLE_BIT,
};

/// Largest value of the 4-bit delay fields.
pub const MAX_DELAY: u8 = 15;

/// One of the two DACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dac {
    Dac0,
    Dac1,
}

impl Dac {
    pub const ALL: [Dac; 2] = [Dac::Dac0, Dac::Dac1];

    pub fn from_index(index: usize) -> Result<Dac> {
        match index {
            0 => Ok(Dac::Dac0),
            1 => Ok(Dac::Dac1),
            _ => Err(Error::InvalidParameter(format!("no DAC {index}"))),
        }
    }

    pub fn spi(self) -> SpiDevice {
        match self {
            Dac::Dac0 => SpiDevice::Dac0,
            Dac::Dac1 => SpiDevice::Dac1,
        }
    }
}

/// Which delay a search sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayField {
    Setup,
    Hold,
}

impl DelayField {
    fn register_value(self, delay: u8) -> u8 {
        match self {
            DelayField::Setup => delay << 4,
            DelayField::Hold => delay,
        }
    }
}

/// Result of calibrating one DAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DacCalibration {
    pub edge_msd: u8,
    pub edge_mhd: u8,
    /// Sample delay written to the DAC, `(edge_mhd - edge_msd) / 2`.
    pub sample_delay: u8,
    /// `true` when a sweep ran out without finding an edge and
    /// [`MAX_DELAY`] was used in its place.
    pub degraded: bool,
}

/// Sample delay centered between the two edges.
///
/// A hold edge before the setup edge has no valid window; the delay is
/// clamped to zero.
pub fn sample_delay(edge_msd: u8, edge_mhd: u8) -> u8 {
    (edge_mhd.saturating_sub(edge_msd)) / 2
}

/// Sweep one delay field from 0 up until the check flag drops.
async fn search_edge(engine: &mut Engine, dac: Dac, field: DelayField) -> Result<Outcome<u8>> {
    for delay in 0..=MAX_DELAY {
        engine
            .write_dac_register(dac.spi(), DAC_MSDMHD_ADDR, field.register_value(delay))
            .await?;
        let sd = engine.read_config(dac.spi(), DAC_SD_ADDR).await?;
        debug!(dac = ?dac, field = ?field, delay, check = sd & DAC_SD_CHECK_BIT, "Delay step");
        if sd & DAC_SD_CHECK_BIT == 0 {
            return Ok(Outcome::Converged(delay));
        }
    }
    Ok(Outcome::Exhausted)
}

fn edge_or_max(dac: Dac, field: DelayField, outcome: Outcome<u8>) -> (u8, bool) {
    match outcome {
        Outcome::Converged(edge) => (edge, false),
        Outcome::Retry | Outcome::Exhausted => {
            warn!(dac = ?dac, field = ?field, "No sampling edge found, using maximum delay");
            (MAX_DELAY, true)
        }
    }
}

/// Calibrate the data-sampling window of one DAC.
pub async fn calibrate(engine: &mut Engine, dac: Dac) -> Result<DacCalibration> {
    let controller = engine.read_config(dac.spi(), DAC_CONTROLLER_ADDR).await?;
    debug!(dac = ?dac, controller, "Disabling DAC surveillance and auto modes");
    engine
        .write_dac_register(dac.spi(), DAC_CONTROLLER_ADDR, 0)
        .await?;
    engine.write_dac_register(dac.spi(), DAC_SD_ADDR, 0).await?;

    let msd = search_edge(engine, dac, DelayField::Setup).await?;
    let (edge_msd, msd_degraded) = edge_or_max(dac, DelayField::Setup, msd);

    let mhd = search_edge(engine, dac, DelayField::Hold).await?;
    let (edge_mhd, mhd_degraded) = edge_or_max(dac, DelayField::Hold, mhd);

    let delay = sample_delay(edge_msd, edge_mhd);
    engine
        .write_dac_register(dac.spi(), DAC_MSDMHD_ADDR, 0)
        .await?;
    engine
        .write_dac_register(dac.spi(), DAC_SD_ADDR, delay << 4)
        .await?;

    let result = DacCalibration {
        edge_msd,
        edge_mhd,
        sample_delay: delay,
        degraded: msd_degraded || mhd_degraded,
    };
    info!(
        dac = ?dac,
        edge_msd,
        edge_mhd,
        sample_delay = delay,
        degraded = result.degraded,
        "DAC timing calibrated"
    );
    Ok(result)
}

/// Enable the DAC's FIFO sync and return the FIFO phase (0-7).
pub async fn enable_fifo(engine: &mut Engine, dac: Dac) -> Result<u8> {
    let sync = engine.read_config(dac.spi(), DAC_SYNC_ADDR).await?;
    engine
        .write_dac_register(dac.spi(), DAC_SYNC_ADDR, sync | DAC_SYNC_ENABLE_BIT)
        .await?;
    let stat = engine.read_config(dac.spi(), DAC_FIFO_STAT_ADDR).await?;
    let phase = (stat >> 4) & 0x7;
    debug!(dac = ?dac, phase, "DAC FIFO enabled");
    Ok(phase)
}

pub async fn disable_fifo(engine: &mut Engine, dac: Dac) -> Result<()> {
    let sync = engine.read_config(dac.spi(), DAC_SYNC_ADDR).await?;
    engine
        .write_dac_register(dac.spi(), DAC_SYNC_ADDR, sync & !DAC_SYNC_ENABLE_BIT)
        .await
}
