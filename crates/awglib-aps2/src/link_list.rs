//! Link-list banks: per-channel playback instruction lists.
//!
//! A bank is a list of entries, each naming a waveform segment (address and
//! sample count), its trigger word(s) and a repeat word. The two high bits
//! of the repeat word mark the first and last entry of a mini-sequence, the
//! unit the playback engine loops over. In IQ mode each entry carries a
//! second trigger word for the quadrature channel.
//!
//! Mini-sequence boundaries are derived from the repeat words whenever a
//! bank is built and cannot be set independently.

use awglib_core::{Error, Result};
use tracing::debug;

/// Repeat-word flag: first entry of a mini-sequence.
pub const START_MINI_LL: u16 = 1 << 15;
/// Repeat-word flag: last entry of a mini-sequence.
pub const END_MINI_LL: u16 = 1 << 14;
/// Repeat-word bits holding the actual repeat count.
pub const REPEAT_COUNT_MASK: u16 = !(START_MINI_LL | END_MINI_LL);

/// A validated link-list bank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkListBank {
    addr: Vec<u16>,
    count: Vec<u16>,
    trigger1: Vec<u16>,
    trigger2: Option<Vec<u16>>,
    repeat: Vec<u16>,
    mini_starts: Vec<usize>,
    mini_lengths: Vec<usize>,
}

impl LinkListBank {
    /// Build a single-trigger bank.
    pub fn new(addr: Vec<u16>, count: Vec<u16>, trigger: Vec<u16>, repeat: Vec<u16>) -> Result<Self> {
        Self::build(addr, count, trigger, None, repeat)
    }

    /// Build an IQ-mode bank with two trigger words per entry.
    pub fn new_iq(
        addr: Vec<u16>,
        count: Vec<u16>,
        trigger1: Vec<u16>,
        trigger2: Vec<u16>,
        repeat: Vec<u16>,
    ) -> Result<Self> {
        Self::build(addr, count, trigger1, Some(trigger2), repeat)
    }

    fn build(
        addr: Vec<u16>,
        count: Vec<u16>,
        trigger1: Vec<u16>,
        trigger2: Option<Vec<u16>>,
        repeat: Vec<u16>,
    ) -> Result<Self> {
        let len = addr.len();
        let same = count.len() == len
            && trigger1.len() == len
            && repeat.len() == len
            && trigger2.as_ref().is_none_or(|t| t.len() == len);
        if !same {
            return Err(Error::InvalidParameter(
                "link-list fields must all have the same length".into(),
            ));
        }

        let (mini_starts, mini_lengths) = mini_sequences(&repeat)?;
        Ok(LinkListBank {
            addr,
            count,
            trigger1,
            trigger2,
            repeat,
            mini_starts,
            mini_lengths,
        })
    }

    pub fn len(&self) -> usize {
        self.addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addr.is_empty()
    }

    pub fn is_iq(&self) -> bool {
        self.trigger2.is_some()
    }

    /// Packed words per entry: 4, or 5 in IQ mode.
    pub fn stride(&self) -> usize {
        if self.is_iq() { 5 } else { 4 }
    }

    pub fn addr(&self) -> &[u16] {
        &self.addr
    }

    pub fn count(&self) -> &[u16] {
        &self.count
    }

    pub fn trigger1(&self) -> &[u16] {
        &self.trigger1
    }

    pub fn trigger2(&self) -> Option<&[u16]> {
        self.trigger2.as_deref()
    }

    /// Raw repeat words, including the mini-sequence flags.
    pub fn repeat(&self) -> &[u16] {
        &self.repeat
    }

    /// Repeat count of entry `index` with the flags masked off.
    pub fn repeat_count(&self, index: usize) -> Option<u16> {
        self.repeat.get(index).map(|r| r & REPEAT_COUNT_MASK)
    }

    pub fn mini_sequence_starts(&self) -> &[usize] {
        &self.mini_starts
    }

    pub fn mini_sequence_lengths(&self) -> &[usize] {
        &self.mini_lengths
    }

    /// Interleave the fields entry by entry:
    /// `addr, count, trigger1, [trigger2,] repeat`.
    pub fn pack(&self) -> Vec<u16> {
        let mut packed = Vec::with_capacity(self.stride() * self.len());
        for i in 0..self.len() {
            packed.push(self.addr[i]);
            packed.push(self.count[i]);
            packed.push(self.trigger1[i]);
            if let Some(t2) = &self.trigger2 {
                packed.push(t2[i]);
            }
            packed.push(self.repeat[i]);
        }
        packed
    }

    /// Rebuild a bank from its packed form.
    pub fn unpack(packed: &[u16], iq: bool) -> Result<Self> {
        let stride = if iq { 5 } else { 4 };
        if packed.len() % stride != 0 {
            return Err(Error::InvalidParameter(format!(
                "packed link list of {} words is not a multiple of {stride}",
                packed.len()
            )));
        }
        let column =
            |k: usize| -> Vec<u16> { packed.iter().skip(k).step_by(stride).copied().collect() };
        let trigger2 = iq.then(|| column(3));
        Self::build(column(0), column(1), column(2), trigger2, column(stride - 1))
    }

    /// Packed words for entries `start..stop`.
    ///
    /// When `stop < start` the range wraps past the end of the bank back to
    /// its beginning, so long banks can be streamed through a smaller
    /// on-device buffer.
    pub fn slice(&self, start: usize, stop: usize) -> Result<Vec<u16>> {
        if start > self.len() || stop > self.len() {
            return Err(Error::InvalidParameter(format!(
                "slice {start}..{stop} out of range for {} entries",
                self.len()
            )));
        }
        let packed = self.pack();
        let stride = self.stride();
        if stop < start {
            let mut out = packed[stride * start..].to_vec();
            out.extend_from_slice(&packed[..stride * stop]);
            Ok(out)
        } else {
            Ok(packed[stride * start..stride * stop].to_vec())
        }
    }
}

/// Scan repeat words for mini-sequence boundaries.
///
/// A start flag opens a mini-sequence and the next end flag closes it. A
/// start seen while one is already open restarts it at the new entry.
/// Entries between mini-sequences and end flags with nothing open are
/// accepted and belong to no mini-sequence. The only rejected layout is a
/// start that no later end closes.
fn mini_sequences(repeat: &[u16]) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut starts = Vec::new();
    let mut lengths = Vec::new();
    let mut open: Option<usize> = None;

    for (i, word) in repeat.iter().enumerate() {
        if word & START_MINI_LL != 0 {
            if let Some(s) = open {
                debug!(superseded = s, start = i, "Mini-sequence restarted before its end");
                starts.pop();
            }
            open = Some(i);
            starts.push(i);
        }
        if word & END_MINI_LL != 0 {
            match open.take() {
                Some(s) => lengths.push(i - s + 1),
                None => debug!(entry = i, "End marker with no open mini-sequence"),
            }
        }
    }

    if let Some(s) = open {
        return Err(Error::InvalidParameter(format!(
            "mini-sequence starting at entry {s} has no end marker"
        )));
    }
    Ok((starts, lengths))
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: u16 = START_MINI_LL;
    const E: u16 = END_MINI_LL;

    fn sample_bank() -> LinkListBank {
        LinkListBank::new(
            vec![0, 16, 32, 48, 64],
            vec![3, 3, 7, 1, 0],
            vec![0, 1, 0, 0, 2],
            vec![S | 2, 0, E | 4, S | E, S | E | 9],
        )
        .unwrap()
    }

    #[test]
    fn mini_sequences_derived() {
        let bank = sample_bank();
        assert_eq!(bank.mini_sequence_starts(), &[0, 3, 4]);
        assert_eq!(bank.mini_sequence_lengths(), &[3, 1, 1]);
        assert_eq!(bank.mini_sequence_lengths().iter().sum::<usize>(), bank.len());
        assert_eq!(bank.repeat_count(4), Some(9));
        assert_eq!(bank.repeat_count(5), None);
    }

    #[test]
    fn unclosed_start_rejected() {
        let result = LinkListBank::new(vec![0, 1], vec![0, 0], vec![0, 0], vec![S, 0]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn restarted_mini_sequence_keeps_latest_start() {
        let bank =
            LinkListBank::new(vec![0, 1, 2], vec![0; 3], vec![0; 3], vec![S, S, E]).unwrap();
        assert_eq!(bank.mini_sequence_starts(), &[1]);
        assert_eq!(bank.mini_sequence_lengths(), &[2]);
    }

    #[test]
    fn entries_between_mini_sequences_accepted() {
        let bank = LinkListBank::new(
            vec![0, 1, 2, 3],
            vec![0; 4],
            vec![0; 4],
            vec![S | E, 0, E, S | E],
        )
        .unwrap();
        assert_eq!(bank.mini_sequence_starts(), &[0, 3]);
        assert_eq!(bank.mini_sequence_lengths(), &[1, 1]);
        assert_eq!(bank.len(), 4);
    }

    #[test]
    fn restart_without_end_still_rejected() {
        let result = LinkListBank::new(vec![0, 1], vec![0, 0], vec![0, 0], vec![S | E, S]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let result = LinkListBank::new(vec![0, 1], vec![0], vec![0, 0], vec![S, E]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        let result = LinkListBank::new_iq(vec![0], vec![0], vec![0], vec![], vec![S | E]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn empty_bank_is_valid() {
        let bank = LinkListBank::default();
        assert!(bank.is_empty());
        assert!(bank.pack().is_empty());
        assert_eq!(bank, LinkListBank::new(vec![], vec![], vec![], vec![]).unwrap());
    }

    #[test]
    fn pack_interleaves_fields() {
        let bank = sample_bank();
        let packed = bank.pack();
        assert_eq!(packed.len(), 4 * bank.len());
        assert_eq!(&packed[..8], &[0, 3, 0, S | 2, 16, 3, 1, 0]);
    }

    #[test]
    fn pack_iq_mode() {
        let bank = LinkListBank::new_iq(
            vec![10, 20],
            vec![1, 2],
            vec![3, 4],
            vec![5, 6],
            vec![S, E],
        )
        .unwrap();
        let packed = bank.pack();
        assert_eq!(packed.len(), 5 * bank.len());
        assert_eq!(packed, vec![10, 1, 3, 5, S, 20, 2, 4, 6, E]);
        assert_eq!(bank.pack(), packed);
    }

    #[test]
    fn unpack_recovers_fields() {
        let bank = sample_bank();
        assert_eq!(LinkListBank::unpack(&bank.pack(), false).unwrap(), bank);

        let iq = LinkListBank::new_iq(vec![1], vec![2], vec![3], vec![4], vec![S | E | 5]).unwrap();
        let round = LinkListBank::unpack(&iq.pack(), true).unwrap();
        assert_eq!(round.trigger2(), Some(&[4u16][..]));
        assert_eq!(round, iq);

        assert!(LinkListBank::unpack(&[1, 2, 3], false).is_err());
    }

    #[test]
    fn slice_forward() {
        let bank = sample_bank();
        let packed = bank.pack();
        assert_eq!(bank.slice(1, 3).unwrap(), packed[4..12].to_vec());
        assert!(bank.slice(2, 2).unwrap().is_empty());
    }

    #[test]
    fn slice_wraps_around() {
        let bank = sample_bank();
        let packed = bank.pack();
        let mut expected = packed[4 * 3..].to_vec();
        expected.extend_from_slice(&packed[..4 * 2]);
        assert_eq!(bank.slice(3, 2).unwrap(), expected);
    }

    #[test]
    fn slice_wraps_with_iq_stride() {
        let bank = LinkListBank::new_iq(
            vec![1, 2, 3],
            vec![0; 3],
            vec![0; 3],
            vec![0; 3],
            vec![S | E, S | E, S | E],
        )
        .unwrap();
        let packed = bank.pack();
        let mut expected = packed[5 * 2..].to_vec();
        expected.extend_from_slice(&packed[..5]);
        assert_eq!(bank.slice(2, 1).unwrap(), expected);
    }

    #[test]
    fn slice_out_of_range() {
        let bank = sample_bank();
        assert!(matches!(bank.slice(0, 6), Err(Error::InvalidParameter(_))));
    }
}
