use serde::{Deserialize, Serialize};

use super::lenient_string;

/// Site modeling parameters, as returned by `edit/modeling`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modeling {
    /// DC system size in kW
    pub system_size: Option<f64>,
    pub module_count: Option<i64>,
    pub inverter_count: Option<i64>,
    pub tilt_angle: Option<f64>,
    pub azimuth_angle: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_changed: Option<String>,
}
