//! Throughput and block-size formatting.
//!
//! Rates are computed in KiB/s and promoted to MiB/s at 1024 KiB/s, printed
//! with three decimals. The unit strings use the short spelling
//! ("KB/s", "MB/s") so reports stay comparable with earlier runs.

use serde::{Deserialize, Serialize};
use std::fmt;

const KIB: f64 = 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThroughputUnit {
    #[serde(rename = "KB/s")]
    KiloBytesPerSecond,
    #[serde(rename = "MB/s")]
    MegaBytesPerSecond,
}

impl fmt::Display for ThroughputUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::KiloBytesPerSecond => "KB/s",
            Self::MegaBytesPerSecond => "MB/s",
        };
        write!(f, "{value}")
    }
}

/// A rate ready for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub value: f64,
    pub unit: ThroughputUnit,
}

impl Throughput {
    /// Promote a KiB/s rate to MiB/s when it reaches 1024.
    pub fn from_kbps(kbps: f64) -> Self {
        if kbps >= KIB {
            Self {
                value: kbps / KIB,
                unit: ThroughputUnit::MegaBytesPerSecond,
            }
        } else {
            Self {
                value: kbps,
                unit: ThroughputUnit::KiloBytesPerSecond,
            }
        }
    }

    /// Rate for `bytes` moved in `seconds`. `None` unless `seconds` is a
    /// positive finite number.
    pub fn from_transfer(bytes: u64, seconds: f64) -> Option<Self> {
        (seconds.is_finite() && seconds > 0.0).then(|| Self::from_kbps(kbps(bytes, seconds)))
    }

    /// The rate expressed in KiB/s regardless of display unit.
    pub fn as_kbps(&self) -> f64 {
        match self.unit {
            ThroughputUnit::KiloBytesPerSecond => self.value,
            ThroughputUnit::MegaBytesPerSecond => self.value * KIB,
        }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} {}", self.value, self.unit)
    }
}

/// KiB/s for `bytes` over `seconds`.
pub fn kbps(bytes: u64, seconds: f64) -> f64 {
    (bytes as f64 / KIB) / seconds
}

/// Row label for a block size: `"  2 MiB"`, `"512 KiB"`, `"0.5 KiB"`.
pub fn block_size_label(size: usize) -> String {
    if size >= 1024 * 1024 {
        format!("{:>3} MiB", size >> 20)
    } else if size >= 1024 {
        format!("{:>3} KiB", size >> 10)
    } else {
        format!("{:.1} KiB", size as f64 / KIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_mib_in_one_second() {
        let rate = Throughput::from_transfer(2_097_152, 1.0).unwrap();
        assert_eq!(rate.unit, ThroughputUnit::MegaBytesPerSecond);
        assert_eq!(rate.to_string(), "2.000 MB/s");
    }

    #[test]
    fn test_promotion_boundary() {
        assert_eq!(Throughput::from_kbps(1024.0).to_string(), "1.000 MB/s");
        assert_eq!(Throughput::from_kbps(1023.5).to_string(), "1023.500 KB/s");
    }

    #[test]
    fn test_small_rate_stays_in_kilobytes() {
        let rate = Throughput::from_transfer(512 * 4, 4.0).unwrap();
        assert_eq!(rate.to_string(), "0.500 KB/s");
        assert!((rate.as_kbps() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_non_positive_elapsed_rejected() {
        assert!(Throughput::from_transfer(1024, 0.0).is_none());
        assert!(Throughput::from_transfer(1024, -1.0).is_none());
        assert!(Throughput::from_transfer(1024, f64::NAN).is_none());
    }

    #[test]
    fn test_block_size_labels() {
        assert_eq!(block_size_label(2 * 1024 * 1024), "  2 MiB");
        assert_eq!(block_size_label(1024 * 1024), "  1 MiB");
        assert_eq!(block_size_label(512 * 1024), "512 KiB");
        assert_eq!(block_size_label(4 * 1024), "  4 KiB");
        assert_eq!(block_size_label(512), "0.5 KiB");
    }

    #[test]
    fn test_throughput_serializes_with_unit_string() {
        let json = serde_json::to_string(&Throughput::from_kbps(2048.0)).unwrap();
        assert_eq!(json, r#"{"value":2.0,"unit":"MB/s"}"#);
    }

    proptest! {
        #[test]
        fn prop_unit_promotion(bytes in 1u64..(1u64 << 34), millis in 1u64..100_000) {
            let seconds = millis as f64 / 1000.0;
            let expected_kbps = (bytes as f64 / 1024.0) / seconds;
            let rate = Throughput::from_transfer(bytes, seconds).unwrap();
            if expected_kbps >= 1024.0 {
                prop_assert_eq!(rate.unit, ThroughputUnit::MegaBytesPerSecond);
                prop_assert!((rate.value - expected_kbps / 1024.0).abs() <= 1e-9 * rate.value.max(1.0));
            } else {
                prop_assert_eq!(rate.unit, ThroughputUnit::KiloBytesPerSecond);
                prop_assert!((rate.value - expected_kbps).abs() <= 1e-9 * rate.value.max(1.0));
            }
        }
    }
}
