//! Prosody properties shared by the built-in engines.
//!
//! Callers speak normalized `[0, 1]` values; engines store integer levels in
//! their own ranges. Scaling discards the fractional part.

use crate::error::{Result, VocalisError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRange {
    pub min: i32,
    pub max: i32,
    pub default: i32,
}

pub const RATE_RANGE: PropertyRange = PropertyRange {
    min: 20,
    max: 500,
    default: 100,
};

pub const PITCH_RANGE: PropertyRange = PropertyRange {
    min: 50,
    max: 200,
    default: 100,
};

pub const VOLUME_RANGE: PropertyRange = PropertyRange {
    min: 0,
    max: 500,
    default: 100,
};

impl PropertyRange {
    /// Map a normalized value onto this range.
    ///
    /// # Errors
    /// `InvalidArgument` for NaN, infinities and values outside `[0, 1]`.
    pub fn scale(&self, normalized: f32) -> Result<i32> {
        if !(0.0..=1.0).contains(&normalized) {
            return Err(VocalisError::InvalidArgument(format!(
                "normalized value {normalized} outside [0, 1]"
            )));
        }
        let level = self.min as f32 + normalized * (self.max - self.min) as f32;
        Ok(level as i32)
    }

    /// Level relative to the default, `1.0` at the default level.
    pub fn factor(&self, level: i32) -> f32 {
        if self.default == 0 {
            return 1.0;
        }
        level as f32 / self.default as f32
    }

    fn contains(&self, level: i32) -> bool {
        (self.min..=self.max).contains(&level)
    }
}

/// Current rate/pitch/volume levels of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineProperties {
    pub rate: i32,
    pub pitch: i32,
    pub volume: i32,
}

impl Default for EngineProperties {
    fn default() -> Self {
        Self {
            rate: RATE_RANGE.default,
            pitch: PITCH_RANGE.default,
            volume: VOLUME_RANGE.default,
        }
    }
}

impl EngineProperties {
    pub fn set_rate(&mut self, normalized: f32) -> Result<()> {
        self.rate = RATE_RANGE.scale(normalized)?;
        Ok(())
    }

    pub fn set_pitch(&mut self, normalized: f32) -> Result<()> {
        self.pitch = PITCH_RANGE.scale(normalized)?;
        Ok(())
    }

    pub fn set_volume(&mut self, normalized: f32) -> Result<()> {
        self.volume = VOLUME_RANGE.scale(normalized)?;
        Ok(())
    }

    pub fn restore_defaults(&mut self) {
        *self = Self::default();
    }

    fn slot(&mut self, name: &str) -> Result<(&mut i32, PropertyRange)> {
        match name {
            "rate" => Ok((&mut self.rate, RATE_RANGE)),
            "pitch" => Ok((&mut self.pitch, PITCH_RANGE)),
            "volume" => Ok((&mut self.volume, VOLUME_RANGE)),
            other => Err(VocalisError::InvalidArgument(format!(
                "unsupported property '{other}'"
            ))),
        }
    }

    /// Decimal string of the named level.
    pub fn get(&self, name: &str) -> Result<String> {
        let level = match name {
            "rate" => self.rate,
            "pitch" => self.pitch,
            "volume" => self.volume,
            other => {
                return Err(VocalisError::InvalidArgument(format!(
                    "unsupported property '{other}'"
                )))
            }
        };
        Ok(level.to_string())
    }

    /// Set a level from an engine-native decimal string. Fractions are
    /// truncated; values outside the property's range are rejected.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let (slot, range) = self.slot(name)?;
        let parsed: f64 = value.trim().parse().map_err(|_| {
            VocalisError::InvalidArgument(format!("property '{name}' needs a number, got '{value}'"))
        })?;
        if !parsed.is_finite() {
            return Err(VocalisError::InvalidArgument(format!(
                "property '{name}' must be finite"
            )));
        }
        let level = parsed.trunc() as i32;
        if !range.contains(level) {
            return Err(VocalisError::InvalidArgument(format!(
                "property '{name}' level {level} outside {}..={}",
                range.min, range.max
            )));
        }
        *slot = level;
        Ok(())
    }
}
