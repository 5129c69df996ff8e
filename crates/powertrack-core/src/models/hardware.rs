use serde::{Deserialize, Serialize};

use super::lenient_string;

/// A hardware device at a site, as returned by `sitehardwareproduction`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hardware {
    #[serde(default, deserialize_with = "lenient_string")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    pub function_code: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub manufacturer: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub serial_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_changed: Option<String>,
}

/// Device category derived from the PowerTrack function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareKind {
    Inverter,
    Meter,
    WeatherStation,
    Gateway,
    Other,
}

impl HardwareKind {
    pub fn from_function_code(code: Option<i64>) -> Self {
        match code {
            Some(1) => HardwareKind::Inverter,
            Some(2 | 3 | 4 | 20 | 37) => HardwareKind::Meter,
            Some(5) => HardwareKind::WeatherStation,
            Some(10) => HardwareKind::Gateway,
            _ => HardwareKind::Other,
        }
    }
}

impl Hardware {
    pub fn kind(&self) -> HardwareKind {
        HardwareKind::from_function_code(self.function_code)
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.key.as_deref())
            .unwrap_or("(unnamed)")
    }
}
