//! Unit systems
//!
//! Home Assistant ships two named presets. The legacy `imperial` name is
//! still accepted and resolves to `us_customary`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key of the metric preset
pub const UNIT_SYSTEM_METRIC: &str = "metric";

/// Key of the US customary preset
pub const UNIT_SYSTEM_US_CUSTOMARY: &str = "us_customary";

const UNIT_SYSTEM_IMPERIAL: &str = "imperial";

/// Unknown unit system name
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0} is not a valid unit system")]
pub struct UnitSystemError(pub String);

/// A set of units used for display and conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSystem {
    /// Preset key (`metric` or `us_customary`)
    pub name: String,
    pub length: String,
    pub accumulated_precipitation: String,
    pub mass: String,
    pub pressure: String,
    pub temperature: String,
    pub volume: String,
    pub wind_speed: String,
    pub area: String,
}

impl UnitSystem {
    /// Metric unit system
    pub fn metric() -> Self {
        Self {
            name: UNIT_SYSTEM_METRIC.to_string(),
            length: "km".to_string(),
            accumulated_precipitation: "mm".to_string(),
            mass: "g".to_string(),
            pressure: "Pa".to_string(),
            temperature: "°C".to_string(),
            volume: "L".to_string(),
            wind_speed: "m/s".to_string(),
            area: "m²".to_string(),
        }
    }

    /// US customary unit system
    pub fn us_customary() -> Self {
        Self {
            name: UNIT_SYSTEM_US_CUSTOMARY.to_string(),
            length: "mi".to_string(),
            accumulated_precipitation: "in".to_string(),
            mass: "lb".to_string(),
            pressure: "psi".to_string(),
            temperature: "°F".to_string(),
            volume: "gal".to_string(),
            wind_speed: "mph".to_string(),
            area: "ft²".to_string(),
        }
    }
}

impl Default for UnitSystem {
    fn default() -> Self {
        Self::metric()
    }
}

/// Normalize a configured unit system name to a preset key
pub fn validate_unit_system(name: &str) -> Result<&'static str, UnitSystemError> {
    match name.to_lowercase().as_str() {
        UNIT_SYSTEM_METRIC => Ok(UNIT_SYSTEM_METRIC),
        UNIT_SYSTEM_US_CUSTOMARY | UNIT_SYSTEM_IMPERIAL => Ok(UNIT_SYSTEM_US_CUSTOMARY),
        _ => Err(UnitSystemError(name.to_string())),
    }
}

/// Resolve a unit system by name
pub fn get_unit_system(name: &str) -> Result<UnitSystem, UnitSystemError> {
    match validate_unit_system(name)? {
        UNIT_SYSTEM_US_CUSTOMARY => Ok(UnitSystem::us_customary()),
        _ => Ok(UnitSystem::metric()),
    }
}
