//! Site list entries and the collected per-site data bundle.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use super::{Alert, Hardware, Modeling};

/// One site from a site list (e.g. `SiteList.json`).
///
/// Fields other than `key` and `outputDir` are kept verbatim so they are
/// written back out with the site data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteEntry {
    pub key: String,
    #[serde(rename = "outputDir", default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SiteEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            output_dir: None,
            extra: Map::new(),
        }
    }
}

/// Everything collected for one site; written as `<site>_complete.json`.
///
/// Payloads stay as JSON so fields this crate does not model survive the
/// trip to disk. Use the typed accessors to read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteData {
    pub site_info: SiteEntry,
    pub hardware: Value,
    pub alerts: Value,
    pub modeling: Value,
    pub fetched_at: DateTime<Utc>,
}

impl SiteData {
    /// Assemble site data, substituting empty defaults for missing payloads.
    pub fn new(
        site_info: SiteEntry,
        hardware: Option<Value>,
        alerts: Option<Value>,
        modeling: Option<Value>,
    ) -> Self {
        Self {
            site_info,
            hardware: hardware.unwrap_or_else(|| Value::Array(Vec::new())),
            alerts: alerts.unwrap_or_else(|| Value::Array(Vec::new())),
            modeling: modeling.unwrap_or_else(|| Value::Object(Map::new())),
            fetched_at: Utc::now(),
        }
    }

    pub fn site_key(&self) -> &str {
        &self.site_info.key
    }

    pub fn hardware(&self) -> Vec<Hardware> {
        parse_records(&self.hardware, "hardware")
    }

    pub fn alerts(&self) -> Vec<Alert> {
        parse_records(&self.alerts, "alert")
    }

    /// `None` when no modeling data was returned
    pub fn modeling(&self) -> Option<Modeling> {
        match &self.modeling {
            Value::Object(map) if !map.is_empty() => {
                match serde_json::from_value(self.modeling.clone()) {
                    Ok(modeling) => Some(modeling),
                    Err(e) => {
                        warn!(site = %self.site_info.key, error = %e, "Failed to parse modeling data");
                        None
                    }
                }
            }
            _ => None,
        }
    }
}

/// Parse an array of records, skipping (and logging) the ones that don't fit
fn parse_records<T: DeserializeOwned>(value: &Value, kind: &str) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match serde_json::from_value(item.clone()) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(kind, index = i, error = %e, "Skipping malformed record");
                    None
                }
            })
            .collect(),
        Value::Null => Vec::new(),
        _ => {
            warn!(kind, "Expected a list of records");
            Vec::new()
        }
    }
}

/// Load a site list file.
///
/// Accepts either a bare JSON array of sites or an object with a `sites`
/// array. Any other shape is logged and yields no sites; entries without a
/// `key` are skipped.
pub fn load_site_list(path: &Path) -> Result<Vec<SiteEntry>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read site list: {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse site list: {}", path.display()))?;

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("sites") {
            Some(Value::Array(items)) => items,
            _ => {
                error!(path = %path.display(), "Unexpected site list format");
                return Ok(Vec::new());
            }
        },
        _ => {
            error!(path = %path.display(), "Unexpected site list format");
            return Ok(Vec::new());
        }
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<SiteEntry>(entry) {
            Ok(site) => Some(site),
            Err(e) => {
                warn!(error = %e, "Skipping site list entry");
                None
            }
        })
        .collect())
}
