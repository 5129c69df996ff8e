//! SQLite storage for collected site data.
//!
//! Three tables keyed by site: `hardware`, `alerts` and `modeling`. Rows are
//! upserted with `INSERT OR REPLACE` on their natural keys, so re-running a
//! collection refreshes rows in place instead of duplicating them.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::SiteData;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hardware (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_key TEXT NOT NULL,
    hardware_key TEXT NOT NULL,
    name TEXT,
    type_code INTEGER,
    manufacturer TEXT,
    model TEXT,
    serial_number TEXT,
    status TEXT,
    last_updated TEXT,
    created_at TEXT,
    UNIQUE(site_key, hardware_key)
);
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_key TEXT NOT NULL,
    alert_key TEXT NOT NULL,
    name TEXT,
    type TEXT,
    severity TEXT,
    status TEXT,
    last_updated TEXT,
    created_at TEXT,
    UNIQUE(site_key, alert_key)
);
CREATE TABLE IF NOT EXISTS modeling (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_key TEXT NOT NULL UNIQUE,
    system_size_kw REAL,
    module_count INTEGER,
    inverter_count INTEGER,
    tilt_angle REAL,
    azimuth_angle REAL,
    last_updated TEXT,
    created_at TEXT
);
";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareRecord {
    pub site_key: String,
    pub hardware_key: String,
    pub name: Option<String>,
    pub type_code: Option<i64>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub status: Option<String>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub site_key: String,
    pub alert_key: String,
    pub name: Option<String>,
    pub alert_type: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelingRecord {
    pub site_key: String,
    pub system_size_kw: Option<f64>,
    pub module_count: Option<i64>,
    pub inverter_count: Option<i64>,
    pub tilt_angle: Option<f64>,
    pub azimuth_angle: Option<f64>,
    pub last_updated: Option<String>,
}

/// Row counts across the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub hardware_count: u64,
    pub alerts_count: u64,
    /// Distinct sites with at least one hardware row
    pub sites_count: u64,
}

/// Rows written for one site by [`SiteDatabase::store_site`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredCounts {
    pub hardware: usize,
    pub alerts: usize,
    pub modeling: bool,
}

pub struct SiteDatabase {
    conn: Connection,
}

impl SiteDatabase {
    /// Open (or create) the database at `path`, creating tables if missing.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| DatabaseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.create_tables()?;
        info!(path = %path.display(), "Database ready");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn insert_hardware(&self, record: &HardwareRecord) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO hardware ( \
                site_key, hardware_key, name, type_code, manufacturer, \
                model, serial_number, status, last_updated, created_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        stmt.execute(params![
            record.site_key,
            record.hardware_key,
            record.name,
            record.type_code,
            record.manufacturer,
            record.model,
            record.serial_number,
            record.status,
            record.last_updated,
            Utc::now().to_rfc3339(),
        ])?;
        debug!(hardware = %record.hardware_key, "Inserted hardware");
        Ok(())
    }

    pub fn insert_alert(&self, record: &AlertRecord) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO alerts ( \
                site_key, alert_key, name, type, severity, \
                status, last_updated, created_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        stmt.execute(params![
            record.site_key,
            record.alert_key,
            record.name,
            record.alert_type,
            record.severity,
            record.status,
            record.last_updated,
            Utc::now().to_rfc3339(),
        ])?;
        debug!(alert = %record.alert_key, "Inserted alert");
        Ok(())
    }

    pub fn insert_modeling(&self, record: &ModelingRecord) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO modeling ( \
                site_key, system_size_kw, module_count, inverter_count, \
                tilt_angle, azimuth_angle, last_updated, created_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        stmt.execute(params![
            record.site_key,
            record.system_size_kw,
            record.module_count,
            record.inverter_count,
            record.tilt_angle,
            record.azimuth_angle,
            record.last_updated,
            Utc::now().to_rfc3339(),
        ])?;
        debug!(site = %record.site_key, "Inserted modeling data");
        Ok(())
    }

    pub fn site_hardware(&self, site_key: &str) -> Result<Vec<HardwareRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT site_key, hardware_key, name, type_code, manufacturer, \
                model, serial_number, status, last_updated \
            FROM hardware WHERE site_key = ?1 ORDER BY hardware_key",
        )?;
        let rows = stmt.query_map([site_key], map_hardware)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn site_alerts(&self, site_key: &str) -> Result<Vec<AlertRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT site_key, alert_key, name, type, severity, status, last_updated \
            FROM alerts WHERE site_key = ?1 ORDER BY alert_key",
        )?;
        let rows = stmt.query_map([site_key], map_alert)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn site_modeling(&self, site_key: &str) -> Result<Option<ModelingRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT site_key, system_size_kw, module_count, inverter_count, \
                tilt_angle, azimuth_angle, last_updated \
            FROM modeling WHERE site_key = ?1",
        )?;
        let mut rows = stmt.query_map([site_key], map_modeling)?;
        Ok(rows.next().transpose()?)
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        };
        Ok(DatabaseStats {
            hardware_count: count("SELECT COUNT(*) FROM hardware")?,
            alerts_count: count("SELECT COUNT(*) FROM alerts")?,
            sites_count: count("SELECT COUNT(DISTINCT site_key) FROM hardware")?,
        })
    }

    /// Upsert everything collected for a site in one transaction.
    ///
    /// Hardware and alert records without a key are skipped with a warning.
    pub fn store_site(&self, site_key: &str, data: &SiteData) -> Result<StoredCounts> {
        let tx = self.conn.unchecked_transaction()?;
        let mut counts = StoredCounts::default();

        for device in data.hardware() {
            let Some(hardware_key) = device.key.clone() else {
                warn!(site = %site_key, name = %device.display_name(), "Skipping hardware without key");
                continue;
            };
            self.insert_hardware(&HardwareRecord {
                site_key: site_key.to_string(),
                hardware_key,
                name: device.name,
                type_code: device.function_code,
                manufacturer: device.manufacturer,
                model: device.model,
                serial_number: device.serial_number,
                status: device.status,
                last_updated: device.last_changed,
            })?;
            counts.hardware += 1;
        }

        for alert in data.alerts() {
            let Some(alert_key) = alert.key else {
                warn!(site = %site_key, "Skipping alert without key");
                continue;
            };
            self.insert_alert(&AlertRecord {
                site_key: site_key.to_string(),
                alert_key,
                name: alert.name,
                alert_type: alert.alert_type,
                severity: alert.severity,
                status: alert.status,
                last_updated: alert.last_changed,
            })?;
            counts.alerts += 1;
        }

        if let Some(modeling) = data.modeling() {
            self.insert_modeling(&ModelingRecord {
                site_key: site_key.to_string(),
                system_size_kw: modeling.system_size,
                module_count: modeling.module_count,
                inverter_count: modeling.inverter_count,
                tilt_angle: modeling.tilt_angle,
                azimuth_angle: modeling.azimuth_angle,
                last_updated: modeling.last_changed,
            })?;
            counts.modeling = true;
        }

        tx.commit()?;
        info!(
            site = %site_key,
            hardware = counts.hardware,
            alerts = counts.alerts,
            modeling = counts.modeling,
            "Stored site in database"
        );
        Ok(counts)
    }
}

fn map_hardware(row: &Row<'_>) -> rusqlite::Result<HardwareRecord> {
    Ok(HardwareRecord {
        site_key: row.get(0)?,
        hardware_key: row.get(1)?,
        name: row.get(2)?,
        type_code: row.get(3)?,
        manufacturer: row.get(4)?,
        model: row.get(5)?,
        serial_number: row.get(6)?,
        status: row.get(7)?,
        last_updated: row.get(8)?,
    })
}

fn map_alert(row: &Row<'_>) -> rusqlite::Result<AlertRecord> {
    Ok(AlertRecord {
        site_key: row.get(0)?,
        alert_key: row.get(1)?,
        name: row.get(2)?,
        alert_type: row.get(3)?,
        severity: row.get(4)?,
        status: row.get(5)?,
        last_updated: row.get(6)?,
    })
}

fn map_modeling(row: &Row<'_>) -> rusqlite::Result<ModelingRecord> {
    Ok(ModelingRecord {
        site_key: row.get(0)?,
        system_size_kw: row.get(1)?,
        module_count: row.get(2)?,
        inverter_count: row.get(3)?,
        tilt_angle: row.get(4)?,
        azimuth_angle: row.get(5)?,
        last_updated: row.get(6)?,
    })
}
