use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::models::{SiteData, SiteEntry};
use crate::summaries::HardwareSummary;

/// Subdirectories created under every site directory
const SUBDIRS: [&str; 3] = ["Settings", "Alerts", "modeling"];

/// Resolve the output directory for a site: its `outputDir` when set,
/// otherwise `<base>/<site_key>`.
pub fn site_output_dir(site: &SiteEntry, base: &Path) -> PathBuf {
    match site.output_dir.as_deref() {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => base.join(&site.key),
    }
}

/// Standard file locations inside a site directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub complete_data: PathBuf,
    pub hardware_data: PathBuf,
    pub hardware_summary: PathBuf,
    pub alerts_data: PathBuf,
    pub modeling_data: PathBuf,
    pub modeling_summary: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path, site_key: &str) -> Self {
        Self {
            complete_data: dir.join(format!("{site_key}_complete.json")),
            hardware_data: dir.join(format!("{site_key}_all_hardware.json")),
            hardware_summary: dir.join(format!("{site_key}_hardware_summary.json")),
            alerts_data: dir.join("Alerts").join(format!("{site_key}_all_alerts.json")),
            modeling_data: dir.join("modeling").join(format!("{site_key}_modeling.json")),
            modeling_summary: dir
                .join("modeling")
                .join(format!("{site_key}_modeling_summary.json")),
        }
    }
}

/// Writer for one site's output directory.
pub struct SiteOutput {
    dir: PathBuf,
    paths: OutputPaths,
}

impl SiteOutput {
    /// Create the site directory (and its standard subdirectories).
    pub fn create(site: &SiteEntry, base: &Path) -> Result<Self> {
        let dir = site_output_dir(site, base);
        for sub in SUBDIRS {
            let path = dir.join(sub);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create output directory: {}", path.display()))?;
        }
        let paths = OutputPaths::new(&dir, &site.key);
        Ok(Self { dir, paths })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    fn save<T: Serialize + ?Sized>(&self, path: &Path, data: &T) -> Result<()> {
        let contents = serde_json::to_string_pretty(data)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "Wrote output file");
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let data = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(data))
    }

    pub fn save_complete(&self, data: &SiteData) -> Result<()> {
        self.save(&self.paths.complete_data, data)
    }

    pub fn load_complete(&self) -> Result<Option<SiteData>> {
        self.load(&self.paths.complete_data)
    }

    /// Write the complete document plus the per-kind split files.
    pub fn save_all(&self, data: &SiteData) -> Result<()> {
        self.save_complete(data)?;
        self.save(&self.paths.hardware_data, &data.hardware)?;
        self.save(
            &self.paths.hardware_summary,
            &HardwareSummary::from_hardware(&data.hardware()),
        )?;
        self.save(&self.paths.alerts_data, &data.alerts)?;
        self.save(&self.paths.modeling_data, &data.modeling)?;
        if let Some(modeling) = data.modeling() {
            self.save(&self.paths.modeling_summary, &modeling)?;
        }
        debug!(site = %data.site_key(), dir = %self.dir.display(), "Saved site output");
        Ok(())
    }
}
