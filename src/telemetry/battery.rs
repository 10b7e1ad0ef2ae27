//! Battery voltage sources and the periodic monitor.
//!
//! Sources:
//! - [`SysfsBattery`]: Linux power-supply `voltage_now` (microvolts)
//! - [`DividerVoltage`]: raw ADC count (e.g. IIO `in_voltageN_raw`) behind a
//!   resistor divider, `Vin = Vout * (R1 + R2) / R2`
//! - [`FixedVoltage`]: constant, for hosts without a battery

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::{RcLinkError, Result};

/// Anything that can report a voltage.
pub trait VoltageSource: Send {
    fn read_volts(&mut self) -> Result<f32>;
}

/// Which [`VoltageSource`] to build, from `[telemetry] battery_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryKind {
    /// No battery readout
    None,
    Sysfs,
    Divider,
    Fixed,
}

fn read_integer(path: &Path) -> Result<i64> {
    let raw = fs::read_to_string(path)?;
    raw.trim()
        .parse::<i64>()
        .map_err(|e| RcLinkError::Channel(format!("Invalid reading in {}: {}", path.display(), e)))
}

/// `/sys/class/power_supply/*/voltage_now` reader.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    path: PathBuf,
}

impl SysfsBattery {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl VoltageSource for SysfsBattery {
    fn read_volts(&mut self) -> Result<f32> {
        let microvolts = read_integer(&self.path)?;
        Ok(microvolts as f32 / 1_000_000.0)
    }
}

/// Raw ADC count behind a resistor divider.
#[derive(Debug, Clone)]
pub struct DividerVoltage {
    path: PathBuf,
    volts_per_count: f32,
    r1: f32,
    r2: f32,
}

impl DividerVoltage {
    /// 10-bit ADC on a 5 V reference
    pub const DEFAULT_VOLTS_PER_COUNT: f32 = 0.0049;
    pub const DEFAULT_R1: f32 = 3.3;
    pub const DEFAULT_R2: f32 = 4.7;

    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_divider(path, Self::DEFAULT_VOLTS_PER_COUNT, Self::DEFAULT_R1, Self::DEFAULT_R2)
    }

    pub fn with_divider<P: AsRef<Path>>(path: P, volts_per_count: f32, r1: f32, r2: f32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            volts_per_count,
            r1,
            r2,
        }
    }

    /// Input voltage for an ADC count.
    #[must_use]
    pub fn convert(&self, count: u32) -> f32 {
        let vout = count as f32 * self.volts_per_count;
        vout * (self.r1 + self.r2) / self.r2
    }
}

impl VoltageSource for DividerVoltage {
    fn read_volts(&mut self) -> Result<f32> {
        let count = read_integer(&self.path)?.clamp(0, i64::from(u32::MAX)) as u32;
        Ok(self.convert(count))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedVoltage(pub f32);

impl VoltageSource for FixedVoltage {
    fn read_volts(&mut self) -> Result<f32> {
        Ok(self.0)
    }
}

/// Reads a [`VoltageSource`] at a fixed interval.
pub struct BatteryMonitor {
    source: Box<dyn VoltageSource>,
    interval: Duration,
    last_read_at: Option<Instant>,
    voltage: Option<f32>,
}

impl BatteryMonitor {
    pub fn new(source: Box<dyn VoltageSource>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            last_read_at: None,
            voltage: None,
        }
    }

    /// Reads the source when the interval has elapsed.
    ///
    /// Returns true only when this poll took a new reading.
    pub fn poll(&mut self, now: Instant) -> bool {
        let due = self
            .last_read_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.interval);
        if !due {
            return false;
        }

        self.last_read_at = Some(now);
        match self.source.read_volts() {
            Ok(volts) => {
                self.voltage = Some(volts);
                true
            }
            Err(e) => {
                warn!("Battery read failed: {}", e);
                false
            }
        }
    }

    /// Last successful reading.
    #[must_use]
    pub fn voltage(&self) -> Option<f32> {
        self.voltage
    }
}
