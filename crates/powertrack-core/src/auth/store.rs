//! Env-file backed credential store.
//!
//! The env file is the single source of truth for the Credential Set. A
//! newer capture file (see [`FetchCapture`]) supersedes it: the store derives
//! a fresh set, rewrites the env file atomically and swaps the in-memory set.
//! Readers hold an `Arc` to whichever set was current when they asked, so
//! they never observe a half-applied refresh.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::capture::FetchCapture;
use super::credentials::CredentialSet;
use super::error::{CredentialError, Result};

/// Env key holding the freshness marker of the current set
pub(crate) const REFRESHED_AT_KEY: &str = "POWERTRACK_AUTH_UPDATED_AT";

/// The credential operations the request client depends on.
pub trait CredentialSource: Send + Sync {
    /// The set to use for the next request.
    fn current(&self) -> Arc<CredentialSet>;

    /// Apply a newer capture if there is one. `Ok(false)` means nothing changed.
    fn refresh_if_available(&self) -> Result<bool>;
}

pub struct CredentialStore {
    env_file: PathBuf,
    capture_file: PathBuf,
    current: RwLock<Arc<CredentialSet>>,
    /// Env file mtime at open; stands in for a missing freshness marker
    env_modified: Option<DateTime<Utc>>,
    refresh_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open the store, loading and validating the env file.
    pub fn open(env_file: impl Into<PathBuf>, capture_file: impl Into<PathBuf>) -> Result<Self> {
        let env_file = env_file.into();
        let set = load_env_file(&env_file)?;
        let env_modified = modified_at(&env_file);
        debug!(path = %env_file.display(), refreshed_at = ?set.refreshed_at, "Loaded credentials");

        Ok(Self {
            env_file,
            capture_file: capture_file.into(),
            current: RwLock::new(Arc::new(set)),
            env_modified,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Read the persisted Credential Set from disk without touching the
    /// in-memory one.
    pub fn load(&self) -> Result<CredentialSet> {
        load_env_file(&self.env_file)
    }

    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    pub fn capture_file(&self) -> &Path {
        &self.capture_file
    }

    fn swap(&self, set: CredentialSet) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(set);
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .ok()
}

impl CredentialSource for CredentialStore {
    fn current(&self) -> Arc<CredentialSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn refresh_if_available(&self) -> Result<bool> {
        // Serialize refreshes so concurrent 401s apply a capture once
        let _guard = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(modified) = modified_at(&self.capture_file) else {
            debug!(path = %self.capture_file.display(), "No capture file, keeping current credentials");
            return Ok(false);
        };

        let current = self.current();
        // A hand-written env file carries no marker; its own mtime dates it
        let marker = current.refreshed_at.or(self.env_modified);
        if marker.is_some_and(|marker| modified <= marker) {
            debug!("Capture file is not newer than current credentials");
            return Ok(false);
        }

        let text = match fs::read_to_string(&self.capture_file) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %self.capture_file.display(), error = %e, "Failed to read capture file");
                return Ok(false);
            }
        };

        let next = match FetchCapture::parse(&text).and_then(|c| c.to_credentials(&current, modified)) {
            Ok(set) => set,
            Err(e) => {
                warn!(path = %self.capture_file.display(), error = %e, "Ignoring malformed capture file");
                return Ok(false);
            }
        };

        if let Err(e) = next.check() {
            warn!(error = %e, "Capture produced unusable credentials");
            return Ok(false);
        }

        write_env_file(&self.env_file, &next)?;
        self.swap(next);
        info!(captured_at = %modified, "Credentials refreshed from capture file");
        Ok(true)
    }
}

fn load_env_file(path: &Path) -> Result<CredentialSet> {
    let iter = dotenvy::from_path_iter(path).map_err(|e| env_error(path, e))?;

    let mut values = HashMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| env_error(path, e))?;
        values.insert(key, value);
    }

    let refreshed_at = match values.get(REFRESHED_AT_KEY).map(|v| v.trim()) {
        Some(raw) if !raw.is_empty() => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|e| CredentialError::Parse {
                    path: path.to_path_buf(),
                    message: format!("{REFRESHED_AT_KEY}: {e}"),
                })?
                .with_timezone(&Utc),
        ),
        _ => None,
    };

    CredentialSet::from_env(&values, refreshed_at)
}

fn env_error(path: &Path, e: dotenvy::Error) -> CredentialError {
    match e {
        dotenvy::Error::Io(source) => CredentialError::Read {
            path: path.to_path_buf(),
            source,
        },
        other => CredentialError::Parse {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

/// Quote a value so dotenv parsing returns it verbatim
fn quote_env_value(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$");
        format!("\"{escaped}\"")
    }
}

/// Rewrite the credential keys of an env file, keeping every other line.
///
/// Writes to a temp file next to the target and renames it over the original
/// so a crash mid-write cannot leave a truncated env file behind.
fn write_env_file(path: &Path, set: &CredentialSet) -> Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(CredentialError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut pending: Vec<(&str, String)> = set.to_env();
    let mut lines: Vec<String> = Vec::new();
    for line in existing.lines() {
        let trimmed = line.trim_start();
        let assignment = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let key = assignment.split('=').next().unwrap_or_default().trim();

        if let Some(pos) = pending.iter().position(|(k, _)| *k == key) {
            let (k, v) = pending.remove(pos);
            lines.push(format!("{k}={}", quote_env_value(&v)));
        } else if key == REFRESHED_AT_KEY {
            // Stale marker with no replacement; drop it
        } else {
            lines.push(line.to_string());
        }
    }
    for (k, v) in pending {
        lines.push(format!("{k}={}", quote_env_value(&v)));
    }

    let mut contents = lines.join("\n");
    contents.push('\n');

    let write_err = |source| CredentialError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(".powertrack-env.tmp.{}", std::process::id()));

    fs::write(&tmp_path, contents).map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600)).map_err(write_err)?;
    }

    fs::rename(&tmp_path, path).map_err(write_err)?;
    debug!(path = %path.display(), "Persisted credentials");
    Ok(())
}
