use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal frequency region used to group differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyBand {
    Low,
    Mid,
    High,
}

impl fmt::Display for FrequencyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrequencyBand::Low => "low",
            FrequencyBand::Mid => "mid",
            FrequencyBand::High => "high",
        })
    }
}

/// Buckets a frequency in hertz into a band.
///
/// | Range           | Band |
/// |-----------------|------|
/// | < 1000 Hz       | low  |
/// | 1000 – 4499 Hz  | mid  |
/// | >= 4500 Hz      | high |
pub fn frequency_band(hz: u32) -> FrequencyBand {
    match hz {
        f if f < 1000 => FrequencyBand::Low,
        f if f < 4500 => FrequencyBand::Mid,
        _ => FrequencyBand::High,
    }
}
