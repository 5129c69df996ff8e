//! Data models for PowerTrack entities.
//!
//! This module contains the data structures used to represent PowerTrack
//! data including:
//!
//! - `SiteEntry`, `SiteData`: site list entries and the per-site bundle written to disk
//! - `Hardware`: inverters, meters, weather stations, gateways
//! - `Alert`: alert definitions and their state
//! - `Modeling`: system design parameters used for expected-energy models
//!
//! The API is loosely typed, so record fields are optional and accept
//! numbers where strings are expected.

pub mod alert;
pub mod hardware;
pub mod modeling;
pub mod site;

pub use alert::Alert;
pub use hardware::{Hardware, HardwareKind};
pub use modeling::Modeling;
pub use site::{load_site_list, SiteData, SiteEntry};

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accept a string, number or bool as an optional string
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
