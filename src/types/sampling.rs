//! Sampling frequency control for telemetry sources

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often a telemetry source polls the simulator, in Hz
///
/// Always within `IDLE..=MAX`; constructors clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct SamplingFrequency(u32);

impl SamplingFrequency {
    /// Rate used while the car is not on track
    pub const IDLE: Self = Self(1);

    /// Default on-track rate
    pub const DEFAULT: Self = Self(20);

    /// Simulator's native tick rate; polling faster yields duplicate ticks
    pub const MAX: Self = Self(60);

    pub fn new(hz: u32) -> Self {
        Self(hz.clamp(Self::IDLE.0, Self::MAX.0))
    }

    pub fn hz(self) -> u32 {
        self.0
    }

    /// Time between two polls
    pub fn interval(self) -> Duration {
        Duration::from_secs_f64(1.0 / self.0 as f64)
    }
}

impl Default for SamplingFrequency {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for SamplingFrequency {
    fn from(hz: u32) -> Self {
        Self::new(hz)
    }
}

impl From<SamplingFrequency> for u32 {
    fn from(freq: SamplingFrequency) -> Self {
        freq.0
    }
}

impl std::fmt::Display for SamplingFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz", self.0)
    }
}
