//! Parser for browser request captures.
//!
//! Chrome DevTools can copy any network request as a Node.js `fetch` call:
//!
//! ```text
//! fetch("https://apps.alsoenergy.com/api/view/sitealerts/S60308", {
//!   "headers": {
//!     "accept": "application/json, text/plain, */*",
//!     "cookie": "ASP.NET_SessionId=...",
//!     "x-csrf-token": "...",
//!     "Referer": "https://apps.alsoenergy.com/powertrack/S60308/overview"
//!   },
//!   "body": null,
//!   "method": "GET"
//! });
//! ```
//!
//! Both arguments are JSON, so they are read with `serde_json`'s streaming
//! deserializer rather than a JavaScript parser.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use super::credentials::CredentialSet;

/// Header names, in preference order, that carry the anti-forgery token
const TOKEN_HEADERS: &[&str] = &[
    "x-csrf-token",
    "x-xsrf-token",
    "requestverificationtoken",
    "x-requestverificationtoken",
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no fetch(...) call found")]
    NoFetchCall,

    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("invalid request options: {0}")]
    InvalidOptions(String),

    #[error("capture has no {0} header")]
    MissingHeader(&'static str),
}

/// Second argument of the captured `fetch` call
#[derive(Debug, Default, Deserialize)]
struct FetchInit {
    #[serde(default)]
    headers: HashMap<String, String>,
    referrer: Option<String>,
}

/// A parsed `fetch(...)` capture.
#[derive(Debug, Clone)]
pub struct FetchCapture {
    pub url: Url,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub referrer: Option<String>,
}

impl FetchCapture {
    pub fn parse(text: &str) -> Result<Self, CaptureError> {
        let start = text.find("fetch(").ok_or(CaptureError::NoFetchCall)?;
        let args = text[start + "fetch(".len()..].trim_start();

        let mut stream = serde_json::Deserializer::from_str(args).into_iter::<String>();
        let raw_url = match stream.next() {
            Some(Ok(url)) => url,
            Some(Err(e)) => return Err(CaptureError::InvalidUrl(e.to_string())),
            None => return Err(CaptureError::InvalidUrl("missing".to_string())),
        };
        let url = Url::parse(&raw_url).map_err(|e| CaptureError::InvalidUrl(e.to_string()))?;

        let rest = args[stream.byte_offset()..].trim_start();
        let init = match rest.strip_prefix(',') {
            Some(options) => serde_json::Deserializer::from_str(options.trim_start())
                .into_iter::<FetchInit>()
                .next()
                .transpose()
                .map_err(|e| CaptureError::InvalidOptions(e.to_string()))?
                .unwrap_or_default(),
            None => FetchInit::default(),
        };

        let headers = init
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        Ok(Self {
            url,
            headers,
            referrer: init.referrer,
        })
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Derive a new Credential Set from this capture.
    ///
    /// The cookie and token must come from the capture. User agent and
    /// referer are often stripped by the browser's copy, so they fall back
    /// to the values of `current`.
    pub fn to_credentials(
        &self,
        current: &CredentialSet,
        captured_at: DateTime<Utc>,
    ) -> Result<CredentialSet, CaptureError> {
        let cookie = self
            .header("cookie")
            .ok_or(CaptureError::MissingHeader("cookie"))?;
        let token = TOKEN_HEADERS
            .iter()
            .find_map(|name| self.header(name))
            .ok_or(CaptureError::MissingHeader("csrf token"))?;

        let referer = self
            .header("referer")
            .or_else(|| self.referrer.as_deref().filter(|r| !r.trim().is_empty()))
            .unwrap_or(&current.referer);

        Ok(CredentialSet {
            base_url: self.url.origin().ascii_serialization(),
            cookie: cookie.to_string(),
            csrf_token: token.to_string(),
            user_agent: self
                .header("user-agent")
                .unwrap_or(&current.user_agent)
                .to_string(),
            referer: referer.to_string(),
            refreshed_at: Some(captured_at),
        })
    }
}
