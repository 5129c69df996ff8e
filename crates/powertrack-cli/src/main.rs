//! PowerTrack collector - fetches hardware, alert and modeling data for a
//! list of PowerTrack sites and stores it as JSON files and in SQLite.
//!
//! Credentials come from an env file that is refreshed from a browser
//! "Copy as fetch" capture whenever a newer one is dropped in place.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use powertrack_core::models::{load_site_list, SiteData, SiteEntry};
use powertrack_core::output::SiteOutput;
use powertrack_core::summaries::{validate_site_data, AlertSummary, HardwareSummary};
use powertrack_core::{
    ApiError, Config, CredentialSource, CredentialStore, RequestClient, SiteDatabase, SiteFetcher,
};

#[derive(Parser, Debug)]
#[command(name = "powertrack", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch site data and store it as JSON files and in the database
    Fetch(FetchArgs),
    /// Apply a newer credential capture, if there is one
    RefreshAuth(CommonArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Config file (default: ~/.config/powertrack/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Credential env file
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Browser "Copy as fetch" capture used to refresh credentials
    #[arg(long)]
    capture_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct FetchArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// JSON file listing the sites to process
    #[arg(long, required_unless_present = "site_id", conflicts_with = "site_id")]
    site_list: Option<PathBuf>,

    /// Process a single site
    #[arg(long)]
    site_id: Option<String>,

    /// Process at most this many sites (0 = all)
    #[arg(long, default_value_t = 0)]
    max_sites: usize,

    /// Base directory for sites without an outputDir
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Don't write to the database
    #[arg(long)]
    skip_db: bool,

    /// SQLite database file
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Attempts per request
    #[arg(long)]
    max_retries: Option<u32>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Sites fetched at once
    #[arg(long)]
    concurrency: Option<usize>,
}

impl CommonArgs {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(path) = &self.env_file {
            config.env_file = path.clone();
        }
        if let Some(path) = &self.capture_file {
            config.capture_file = path.clone();
        }
        Ok(config)
    }
}

impl FetchArgs {
    fn load_config(&self) -> Result<Config> {
        let mut config = self.common.load_config()?;
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(path) = &self.db_path {
            config.db_path = path.clone();
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = secs;
        }
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        Ok(config)
    }

    fn sites(&self) -> Result<Vec<SiteEntry>> {
        let mut sites = match (&self.site_id, &self.site_list) {
            (Some(id), _) => vec![SiteEntry::new(id.as_str())],
            (None, Some(path)) => load_site_list(path)?,
            (None, None) => Vec::new(),
        };
        if self.max_sites > 0 {
            sites.truncate(self.max_sites);
        }
        Ok(sites)
    }
}

/// Initialize the tracing subscriber: stderr plus a per-run log file at
/// `<log_dir>/<command>/<YYYYmmdd_HHMMSS>.log`.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=debug).
fn init_tracing(log_dir: &Path, command: &str) -> Result<WorkerGuard> {
    let dir = log_dir.join(command);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let file_name = format!("{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, file_name));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

#[derive(Debug, Default)]
struct RunStats {
    processed: usize,
    successful: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Fetch(args) => {
            let config = args.load_config()?;
            let _guard = init_tracing(&config.log_dir, "fetch")?;
            run_fetch(&args, &config).await
        }
        Command::RefreshAuth(args) => {
            let config = args.load_config()?;
            let _guard = init_tracing(&config.log_dir, "refresh-auth")?;
            refresh_auth(&config)
        }
    }
}

fn refresh_auth(config: &Config) -> Result<ExitCode> {
    let store = CredentialStore::open(&config.env_file, &config.capture_file)
        .with_context(|| format!("Failed to load credentials from {}", config.env_file.display()))?;

    if store.refresh_if_available()? {
        println!(
            "Applied {} to {}",
            config.capture_file.display(),
            config.env_file.display()
        );
    } else {
        println!(
            "No newer capture at {}; credentials unchanged",
            config.capture_file.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_fetch(args: &FetchArgs, config: &Config) -> Result<ExitCode> {
    info!("Starting PowerTrack site data fetch");

    let sites = args.sites()?;
    if sites.is_empty() {
        error!("No sites to process");
        return Ok(ExitCode::FAILURE);
    }
    let total = sites.len();
    info!(sites = total, "Processing sites");

    let store = CredentialStore::open(&config.env_file, &config.capture_file)
        .with_context(|| format!("Failed to load credentials from {}", config.env_file.display()))?;
    let client = RequestClient::connect(Arc::new(store), config.retry_policy())
        .context("Failed to initialize API client")?
        .with_timeout(config.request_timeout());

    let db = if args.skip_db {
        None
    } else {
        match SiteDatabase::open(&config.db_path) {
            Ok(db) => Some(db),
            Err(e) => {
                warn!(error = %e, "Database unavailable, continuing without it");
                None
            }
        }
    };

    let fetcher = SiteFetcher::new(client)
        .with_pause(config.site_pause())
        .with_concurrency(config.concurrency);

    let mut stats = RunStats::default();
    let mut results = std::pin::pin!(fetcher.fetch_all(sites));

    while let Some((site, result)) = results.next().await {
        match result {
            Ok(Some(data)) => {
                stats.processed += 1;
                if save_site(&site, &data, config, db.as_ref()) {
                    stats.successful += 1;
                } else {
                    stats.failed += 1;
                }
            }
            Ok(None) => {
                stats.processed += 1;
                stats.failed += 1;
                error!(site = %site.key, "Failed to process site");
            }
            Err(e) => {
                stats.failed += 1;
                abort_run(&site, &e);
                break;
            }
        }
    }

    info!(
        total,
        processed = stats.processed,
        successful = stats.successful,
        failed = stats.failed,
        "Processing complete"
    );

    if let Some(db) = &db {
        match db.stats() {
            Ok(db_stats) => info!(
                hardware = db_stats.hardware_count,
                alerts = db_stats.alerts_count,
                sites = db_stats.sites_count,
                "Database totals"
            ),
            Err(e) => warn!(error = %e, "Failed to read database stats"),
        }
    }

    Ok(if stats.successful > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Write a site's files and database rows. Returns false if the files could
/// not be written; database failures are only warnings.
fn save_site(site: &SiteEntry, data: &SiteData, config: &Config, db: Option<&SiteDatabase>) -> bool {
    match serde_json::to_value(data) {
        Ok(value) => {
            for problem in validate_site_data(&value) {
                warn!(site = %site.key, "{}", problem);
            }
        }
        Err(e) => warn!(site = %site.key, error = %e, "Failed to validate site data"),
    }

    let hardware = HardwareSummary::from_hardware(&data.hardware());
    let alerts = AlertSummary::from_alerts(&data.alerts());
    info!(
        site = %site.key,
        devices = hardware.total_devices,
        inverters = hardware.inverters,
        meters = hardware.meters,
        alerts = alerts.total_alerts,
        active_alerts = alerts.active_alerts,
        critical_alerts = alerts.critical_alerts,
        "Fetched site"
    );

    let saved = SiteOutput::create(site, &config.output_dir).and_then(|output| {
        output.save_all(data)?;
        Ok(output)
    });
    let output = match saved {
        Ok(output) => output,
        Err(e) => {
            error!(site = %site.key, error = %e, "Failed to save site data");
            return false;
        }
    };
    info!(site = %site.key, dir = %output.dir().display(), "Saved site data");

    if let Some(db) = db {
        if let Err(e) = db.store_site(&site.key, data) {
            warn!(site = %site.key, error = %e, "Failed to store site in database");
        }
    }
    true
}

fn abort_run(site: &SiteEntry, err: &ApiError) {
    error!(site = %site.key, error = %err, "Stopping run");
    if let Some(remediation) = err.remediation() {
        eprintln!("\n{remediation}");
    }
}
