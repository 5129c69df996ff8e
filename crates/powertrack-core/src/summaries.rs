//! Summary statistics and structural checks for collected site data.

use serde::Serialize;
use serde_json::Value;

use crate::models::{Alert, Hardware, HardwareKind};

/// Top-level keys every site data document must have
const REQUIRED_KEYS: [&str; 4] = ["site_info", "hardware", "alerts", "modeling"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HardwareSummary {
    pub total_devices: usize,
    pub inverters: usize,
    pub meters: usize,
    pub weather_stations: usize,
    pub gateways: usize,
    pub other_devices: usize,
}

impl HardwareSummary {
    pub fn from_hardware(hardware: &[Hardware]) -> Self {
        let mut summary = Self {
            total_devices: hardware.len(),
            ..Self::default()
        };
        for device in hardware {
            match device.kind() {
                HardwareKind::Inverter => summary.inverters += 1,
                HardwareKind::Meter => summary.meters += 1,
                HardwareKind::WeatherStation => summary.weather_stations += 1,
                HardwareKind::Gateway => summary.gateways += 1,
                HardwareKind::Other => summary.other_devices += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub total_alerts: usize,
    pub active_alerts: usize,
    pub inactive_alerts: usize,
    pub critical_alerts: usize,
    pub warning_alerts: usize,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let mut summary = Self {
            total_alerts: alerts.len(),
            ..Self::default()
        };
        for alert in alerts {
            if alert.is_active() {
                summary.active_alerts += 1;
            } else {
                summary.inactive_alerts += 1;
            }

            if alert.is_critical() {
                summary.critical_alerts += 1;
            } else if alert.is_warning() {
                summary.warning_alerts += 1;
            }
        }
        summary
    }
}

/// Check the structure of a site data document.
///
/// Returns one message per problem; an empty list means the document is valid.
pub fn validate_site_data(site_data: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    for key in REQUIRED_KEYS {
        if site_data.get(key).is_none() {
            errors.push(format!("Missing required key: {key}"));
        }
    }

    match site_data.get("hardware") {
        Some(Value::Array(devices)) => {
            for (i, device) in devices.iter().enumerate() {
                if is_blank(device.get("key")) {
                    errors.push(format!("Hardware device {i} missing key"));
                }
                if is_blank(device.get("functionCode")) {
                    errors.push(format!("Hardware device {i} missing functionCode"));
                }
            }
        }
        Some(_) => errors.push("Hardware data must be a list".to_string()),
        None => {}
    }

    errors
}

/// Missing, null, empty string, zero or false
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::Bool(b)) => !b,
        Some(_) => false,
    }
}
