//! The Credential Set: everything needed to build authenticated request headers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::error::{CredentialError, Result};

/// Anti-forgery token header the PowerTrack web app sends with its XHR calls
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Accept header matching what the browser sends for API calls
const ACCEPT_VALUE: &str = "application/json, text/plain, */*";

/// Required fields of a Credential Set, in env-file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    BaseUrl,
    Cookie,
    CsrfToken,
    UserAgent,
    Referer,
}

impl CredentialField {
    pub const ALL: [CredentialField; 5] = [
        CredentialField::BaseUrl,
        CredentialField::Cookie,
        CredentialField::CsrfToken,
        CredentialField::UserAgent,
        CredentialField::Referer,
    ];

    /// Key used for this field in the env file
    pub fn env_key(self) -> &'static str {
        match self {
            CredentialField::BaseUrl => "POWERTRACK_BASE_URL",
            CredentialField::Cookie => "POWERTRACK_COOKIE",
            CredentialField::CsrfToken => "POWERTRACK_CSRF_TOKEN",
            CredentialField::UserAgent => "POWERTRACK_USER_AGENT",
            CredentialField::Referer => "POWERTRACK_REFERER",
        }
    }
}

/// A complete bundle of session material.
///
/// Sets are immutable once built. A refresh produces a new set that replaces
/// the old one as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub base_url: String,
    pub cookie: String,
    pub csrf_token: String,
    pub user_agent: String,
    pub referer: String,
    /// Modification time of the capture file this set was derived from.
    /// `None` when the set was entered by hand and never refreshed.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl CredentialSet {
    /// Build a set from env-style key/value pairs.
    ///
    /// Every field in [`CredentialField::ALL`] must be present and non-empty.
    pub fn from_env(
        values: &HashMap<String, String>,
        refreshed_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let get = |field: CredentialField| -> Result<String> {
            values
                .get(field.env_key())
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(CredentialError::MissingField(field.env_key()))
        };

        let set = Self {
            base_url: get(CredentialField::BaseUrl)?,
            cookie: get(CredentialField::Cookie)?,
            csrf_token: get(CredentialField::CsrfToken)?,
            user_agent: get(CredentialField::UserAgent)?,
            referer: get(CredentialField::Referer)?,
            refreshed_at,
        };
        set.check()?;
        Ok(set)
    }

    pub fn field(&self, field: CredentialField) -> &str {
        match field {
            CredentialField::BaseUrl => &self.base_url,
            CredentialField::Cookie => &self.cookie,
            CredentialField::CsrfToken => &self.csrf_token,
            CredentialField::UserAgent => &self.user_agent,
            CredentialField::Referer => &self.referer,
        }
    }

    /// Whether the set is usable for requests.
    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }

    /// Like [`validate`](Self::validate) but reports the first problem found.
    pub fn check(&self) -> Result<()> {
        for field in CredentialField::ALL {
            if self.field(field).trim().is_empty() {
                return Err(CredentialError::MissingField(field.env_key()));
            }
        }

        parse_base_url(&self.base_url)?;

        for field in [
            CredentialField::Cookie,
            CredentialField::CsrfToken,
            CredentialField::UserAgent,
            CredentialField::Referer,
        ] {
            if HeaderValue::from_str(self.field(field)).is_err() {
                return Err(CredentialError::InvalidHeader(field.env_key()));
            }
        }
        Ok(())
    }

    /// Derive request headers from this set.
    ///
    /// `referer_override` replaces the default referer for this request only.
    /// The result depends on nothing but the arguments.
    pub fn build_headers(&self, referer_override: Option<&str>) -> Result<HeaderMap> {
        let value = |v: &str, name: &'static str| {
            HeaderValue::from_str(v).map_err(|_| CredentialError::InvalidHeader(name))
        };

        let referer = referer_override.unwrap_or(&self.referer);

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(
            header::COOKIE,
            value(&self.cookie, CredentialField::Cookie.env_key())?,
        );
        headers.insert(
            HeaderName::from_static(CSRF_HEADER),
            value(&self.csrf_token, CredentialField::CsrfToken.env_key())?,
        );
        headers.insert(
            header::USER_AGENT,
            value(&self.user_agent, CredentialField::UserAgent.env_key())?,
        );
        headers.insert(header::REFERER, value(referer, "referer")?);
        Ok(headers)
    }

    /// Resolve an API endpoint (e.g. `/api/view/sitealerts/S60308`) against the base URL.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        let base = parse_base_url(&self.base_url)?;
        base.join(endpoint)
            .map_err(|_| CredentialError::InvalidEndpoint(endpoint.to_string()))
    }

    /// Env-file entries describing this set, including the freshness marker.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        let mut entries: Vec<(&'static str, String)> = CredentialField::ALL
            .iter()
            .map(|f| (f.env_key(), self.field(*f).to_string()))
            .collect();
        if let Some(at) = self.refreshed_at {
            entries.push((
                super::store::REFRESHED_AT_KEY,
                at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            ));
        }
        entries
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let invalid = |reason: &str| CredentialError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}
