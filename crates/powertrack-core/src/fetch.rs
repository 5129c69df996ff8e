//! Per-site collection of hardware, alert and modeling data.

use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiError, RequestClient, ReqwestTransport, Transport};
use crate::auth::{CredentialSource, CredentialStore};
use crate::models::{SiteData, SiteEntry};

/// Pause between sites when fetching sequentially
pub const DEFAULT_SITE_PAUSE: Duration = Duration::from_millis(500);

pub fn hardware_endpoint(site_key: &str) -> String {
    format!("/api/view/sitehardwareproduction/{site_key}")
}

pub fn alerts_endpoint(site_key: &str) -> String {
    format!("/api/view/sitealerts/{site_key}")
}

pub fn modeling_endpoint(site_key: &str) -> String {
    format!("/api/edit/modeling/{site_key}")
}

/// Result of fetching one site: `Ok(None)` when nothing usable came back.
pub type SiteResult = Result<Option<SiteData>, ApiError>;

/// Absent, null, or an empty list, object or string
fn is_empty_payload(payload: &Option<Value>) -> bool {
    match payload {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

/// Fetches site data through a shared [`RequestClient`].
///
/// Individual endpoint failures are logged and treated as missing data.
/// Errors that would make every later request fail the same way (expired
/// authentication, unusable credentials) are returned so the caller can stop.
pub struct SiteFetcher<T = ReqwestTransport, C = CredentialStore> {
    client: RequestClient<T, C>,
    pause: Duration,
    concurrency: usize,
}

impl<T: Transport, C: CredentialSource> SiteFetcher<T, C> {
    pub fn new(client: RequestClient<T, C>) -> Self {
        Self {
            client,
            pause: DEFAULT_SITE_PAUSE,
            concurrency: 1,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Number of sites fetched at once (minimum 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn client(&self) -> &RequestClient<T, C> {
        &self.client
    }

    async fn fetch_part(
        &self,
        site_key: &str,
        kind: &str,
        endpoint: &str,
    ) -> Result<Option<Value>, ApiError> {
        debug!(site = %site_key, kind, "Fetching");
        match self.client.get(endpoint).await {
            Ok(body) => Ok(Some(body.into_value())),
            Err(e @ (ApiError::AuthExpired { .. } | ApiError::InvalidConfig(_))) => Err(e),
            Err(e) => {
                warn!(site = %site_key, kind, error = %e, "Failed to fetch {} data", kind);
                Ok(None)
            }
        }
    }

    pub async fn fetch_hardware(&self, site_key: &str) -> Result<Option<Value>, ApiError> {
        self.fetch_part(site_key, "hardware", &hardware_endpoint(site_key))
            .await
    }

    pub async fn fetch_alerts(&self, site_key: &str) -> Result<Option<Value>, ApiError> {
        self.fetch_part(site_key, "alerts", &alerts_endpoint(site_key))
            .await
    }

    pub async fn fetch_modeling(&self, site_key: &str) -> Result<Option<Value>, ApiError> {
        self.fetch_part(site_key, "modeling", &modeling_endpoint(site_key))
            .await
    }

    /// Fetch everything for one site.
    ///
    /// Picks up a newer credential capture before the first request so a
    /// long run benefits from a re-login part way through.
    pub async fn fetch_site(&self, site: &SiteEntry) -> SiteResult {
        let key = site.key.as_str();
        info!(site = %key, "Processing site");

        if self.client.credentials().refresh_if_available()? {
            info!(site = %key, "Using refreshed credentials");
        }

        let hardware = self.fetch_hardware(key).await?;
        let alerts = self.fetch_alerts(key).await?;
        let modeling = self.fetch_modeling(key).await?;

        if [&hardware, &alerts, &modeling].into_iter().all(is_empty_payload) {
            warn!(site = %key, "No data retrieved");
            return Ok(None);
        }

        Ok(Some(SiteData::new(site.clone(), hardware, alerts, modeling)))
    }

    /// Fetch a list of sites, yielding each site with its result as it
    /// completes.
    ///
    /// Sequential runs (concurrency 1) pause between sites and yield in list
    /// order. An `Err` item means the remaining sites cannot succeed either;
    /// dropping the stream at that point cancels any requests in flight.
    pub fn fetch_all(
        &self,
        sites: Vec<SiteEntry>,
    ) -> impl Stream<Item = (SiteEntry, SiteResult)> + '_ {
        let sequential = self.concurrency == 1;
        stream::iter(sites.into_iter().enumerate())
            .map(move |(i, site)| async move {
                if sequential && i > 0 && !self.pause.is_zero() {
                    tokio::time::sleep(self.pause).await;
                }
                let result = self.fetch_site(&site).await;
                (site, result)
            })
            .buffer_unordered(self.concurrency)
    }
}
