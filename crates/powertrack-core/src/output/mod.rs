//! Per-site output files.
//!
//! Each site gets its own directory (the site list's `outputDir`, or
//! `<output_dir>/<site_key>/`) holding pretty-printed JSON documents:
//!
//! - `<site>_complete.json` with everything fetched for the site
//! - `<site>_all_hardware.json`
//! - `Alerts/<site>_all_alerts.json`
//! - `modeling/<site>_modeling.json` and `<site>_modeling_summary.json`

pub mod writer;

pub use writer::{site_output_dir, OutputPaths, SiteOutput};
