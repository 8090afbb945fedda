//! Per-channel output state.
//!
//! A channel holds the normalized waveform as the user supplied it, plus
//! offset and scale. The quantized buffer sent to the device is derived
//! from all three, so changing any of them moves a staged waveform to
//! [`WaveformState::Dirty`] until the session re-uploads it.

use awglib_core::{Error, Result};

use crate::link_list::LinkListBank;

/// Full-scale DAC code.
pub const MAX_WF_AMP: i16 = 8191;

/// Prepared waveforms are padded to a multiple of this many samples.
pub const WF_MODULUS: usize = 4;

/// Where the channel's waveform stands relative to device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformState {
    /// No waveform loaded.
    Empty,
    /// The device copy is stale and must be re-prepared and uploaded.
    Dirty,
    /// The device holds the current prepared waveform.
    Uploaded,
}

/// One analog output channel.
#[derive(Debug, Clone)]
pub struct Channel {
    number: usize,
    offset: f32,
    scale: f32,
    enabled: bool,
    waveform: Vec<f32>,
    state: WaveformState,
    bank: LinkListBank,
}

impl Channel {
    pub fn new(number: usize) -> Self {
        Channel {
            number,
            offset: 0.0,
            scale: 1.0,
            enabled: false,
            waveform: Vec::new(),
            state: WaveformState::Empty,
            bank: LinkListBank::default(),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }

    pub fn state(&self) -> WaveformState {
        self.state
    }

    pub fn bank(&self) -> &LinkListBank {
        &self.bank
    }

    /// Set the offset, clamped to [-1, 1].
    pub fn set_offset(&mut self, offset: f32) -> Result<()> {
        if offset.is_nan() {
            return Err(Error::InvalidParameter("offset is NaN".into()));
        }
        self.offset = offset.clamp(-1.0, 1.0);
        self.mark_dirty();
        Ok(())
    }

    pub fn set_scale(&mut self, scale: f32) -> Result<()> {
        if !scale.is_finite() {
            return Err(Error::InvalidParameter(format!("scale {scale} is not finite")));
        }
        self.scale = scale;
        self.mark_dirty();
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Load a normalized waveform with samples in [-1, 1].
    pub fn set_waveform(&mut self, samples: &[f32]) -> Result<()> {
        if let Some(bad) = samples.iter().find(|s| !(-1.0..=1.0).contains(*s)) {
            return Err(Error::InvalidParameter(format!(
                "waveform sample {bad} outside [-1, 1]"
            )));
        }
        self.waveform = samples.to_vec();
        self.state = if samples.is_empty() {
            WaveformState::Empty
        } else {
            WaveformState::Dirty
        };
        Ok(())
    }

    /// Load a waveform of DAC codes in [-8191, 8191].
    pub fn set_waveform_codes(&mut self, codes: &[i16]) -> Result<()> {
        if let Some(bad) = codes.iter().find(|c| !(-MAX_WF_AMP..=MAX_WF_AMP).contains(*c)) {
            return Err(Error::InvalidParameter(format!(
                "waveform code {bad} outside [-{MAX_WF_AMP}, {MAX_WF_AMP}]"
            )));
        }
        let samples: Vec<f32> = codes
            .iter()
            .map(|c| f32::from(*c) / f32::from(MAX_WF_AMP))
            .collect();
        self.set_waveform(&samples)
    }

    pub fn set_bank(&mut self, bank: LinkListBank) {
        self.bank = bank;
    }

    /// Drop the waveform and link list.
    pub fn clear(&mut self) {
        self.waveform.clear();
        self.bank = LinkListBank::default();
        self.state = WaveformState::Empty;
    }

    fn mark_dirty(&mut self) {
        if self.state == WaveformState::Uploaded {
            self.state = WaveformState::Dirty;
        }
    }

    pub(crate) fn mark_uploaded(&mut self) {
        if self.state == WaveformState::Dirty {
            self.state = WaveformState::Uploaded;
        }
    }

    /// Quantize `scale * x + offset`, clamped to full scale, and pad with
    /// zeros to a multiple of [`WF_MODULUS`].
    pub fn prepare(&self) -> Vec<i16> {
        let mut codes: Vec<i16> = self
            .waveform
            .iter()
            .map(|x| {
                let v = (self.scale * x + self.offset).clamp(-1.0, 1.0);
                (v * f32::from(MAX_WF_AMP)).round() as i16
            })
            .collect();
        codes.resize(codes.len().next_multiple_of(WF_MODULUS), 0);
        codes
    }

    /// Prepared samples packed two per word, first sample in the high half.
    pub fn packed_waveform(&self) -> Vec<u32> {
        pack_samples(&self.prepare())
    }
}

/// Pack 16-bit values two per word, first value in the high half.
pub fn pack_samples<T: Copy + Into<i32>>(values: &[T]) -> Vec<u32> {
    values
        .chunks(2)
        .map(|pair| {
            let hi: i32 = pair[0].into();
            let lo: i32 = pair.get(1).map_or(0, |v| (*v).into());
            (u32::from(hi as u16) << 16) | u32::from(lo as u16)
        })
        .collect()
}
