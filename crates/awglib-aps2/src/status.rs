//! Status bank snapshot.

use std::fmt;

use awglib_core::{Error, Result};

/// Number of words in a status reply.
pub const STATUS_WORDS: usize = 16;

/// Status query mode: host-side status bank.
pub const APS_STATUS_HOST: u8 = 0x00;

/// Decoded status bank. Field order matches the device's reply layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusBank {
    pub host_firmware_version: u32,
    pub user_firmware_version: u32,
    pub configuration_source: u32,
    pub user_status: u32,
    pub dac0_status: u32,
    pub dac1_status: u32,
    pub pll_status: u32,
    pub vcxo_status: u32,
    pub send_packet_count: u32,
    pub receive_packet_count: u32,
    pub sequence_skip_count: u32,
    pub sequence_dup_count: u32,
    pub fcs_overrun_count: u32,
    pub packet_overrun_count: u32,
    pub uptime_seconds: u32,
    pub uptime_nanoseconds: u32,
}

impl StatusBank {
    pub fn from_words(words: &[u32]) -> Result<Self> {
        let w: &[u32; STATUS_WORDS] = words
            .get(..STATUS_WORDS)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "status reply has {} words, expected {STATUS_WORDS}",
                    words.len()
                ))
            })?;
        Ok(StatusBank {
            host_firmware_version: w[0],
            user_firmware_version: w[1],
            configuration_source: w[2],
            user_status: w[3],
            dac0_status: w[4],
            dac1_status: w[5],
            pll_status: w[6],
            vcxo_status: w[7],
            send_packet_count: w[8],
            receive_packet_count: w[9],
            sequence_skip_count: w[10],
            sequence_dup_count: w[11],
            fcs_overrun_count: w[12],
            packet_overrun_count: w[13],
            uptime_seconds: w[14],
            uptime_nanoseconds: w[15],
        })
    }

    /// Uptime in seconds.
    pub fn uptime(&self) -> f64 {
        f64::from(self.uptime_seconds) + f64::from(self.uptime_nanoseconds) / 1e9
    }
}

impl fmt::Display for StatusBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: [(&str, u32); STATUS_WORDS] = [
            ("Host Firmware Version", self.host_firmware_version),
            ("User Firmware Version", self.user_firmware_version),
            ("Configuration Source", self.configuration_source),
            ("User Status", self.user_status),
            ("DAC 0 Status", self.dac0_status),
            ("DAC 1 Status", self.dac1_status),
            ("PLL Status", self.pll_status),
            ("VCXO Status", self.vcxo_status),
            ("Send Packet Count", self.send_packet_count),
            ("Receive Packet Count", self.receive_packet_count),
            ("Sequence Skip Count", self.sequence_skip_count),
            ("Sequence Dup. Count", self.sequence_dup_count),
            ("FCS Overrun Count", self.fcs_overrun_count),
            ("Packet Overrun Count", self.packet_overrun_count),
            ("Uptime (s)", self.uptime_seconds),
            ("Uptime (ns)", self.uptime_nanoseconds),
        ];
        for (name, value) in rows {
            writeln!(f, "{name:<22}: {value:#010x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_in_field_order() {
        let words: Vec<u32> = (0..16).collect();
        let bank = StatusBank::from_words(&words).unwrap();
        assert_eq!(bank.host_firmware_version, 0);
        assert_eq!(bank.vcxo_status, 7);
        assert_eq!(bank.sequence_dup_count, 11);
        assert_eq!(bank.uptime_nanoseconds, 15);
    }

    #[test]
    fn short_reply_rejected() {
        assert!(matches!(
            StatusBank::from_words(&[0; 15]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn uptime_combines_fields() {
        let bank = StatusBank {
            uptime_seconds: 12,
            uptime_nanoseconds: 500_000_000,
            ..StatusBank::default()
        };
        assert_eq!(bank.uptime(), 12.5);
    }

    #[test]
    fn display_lists_every_field() {
        let text = StatusBank::default().to_string();
        assert_eq!(text.lines().count(), STATUS_WORDS);
        assert!(text.starts_with("Host Firmware Version : 0x00000000"));
    }
}
