//! In-memory transport and credential doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::transport::{HttpRequest, HttpResponse, Transport, TransportError, TransportFuture};
use crate::auth::{CredentialError, CredentialSet, CredentialSource};

/// Replays scripted responses, then answers from the route table (matched
/// on URL path), then repeats the fallback forever
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    routes: Vec<(String, HttpResponse)>,
    fallback: HttpResponse,
    pub(crate) requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub(crate) fn always(status: u16, body: &str) -> Self {
        Self::scripted(Vec::new(), HttpResponse::new(status, body))
    }

    pub(crate) fn scripted(
        script: Vec<Result<HttpResponse, TransportError>>,
        fallback: HttpResponse,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            routes: Vec::new(),
            fallback,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer by path; unknown paths get a 404
    pub(crate) fn routed(routes: &[(&str, HttpResponse)]) -> Self {
        Self {
            routes: routes
                .iter()
                .map(|(path, response)| (path.to_string(), response.clone()))
                .collect(),
            ..Self::always(404, "Not Found")
        }
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        let path = request.url.path().to_string();
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            let routed = self.routes.iter().find(|(p, _)| *p == path);
            Ok(routed.map_or_else(|| self.fallback.clone(), |(_, r)| r.clone()))
        });
        Box::pin(async move { next })
    }
}

/// Counts refreshes; every refresh rotates the cookie
pub(crate) struct CountingSource {
    current: Mutex<Arc<CredentialSet>>,
    refreshes: AtomicU32,
    /// Fail every refresh after the first
    broken: bool,
}

impl CountingSource {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(Arc::new(CredentialSet {
                base_url: "https://apps.alsoenergy.com".to_string(),
                cookie: "session=0".to_string(),
                csrf_token: "token".to_string(),
                user_agent: "Mozilla/5.0".to_string(),
                referer: "https://apps.alsoenergy.com/powertrack".to_string(),
                refreshed_at: None,
            })),
            refreshes: AtomicU32::new(0),
            broken: false,
        }
    }

    pub(crate) fn broken() -> Self {
        Self {
            broken: true,
            ..Self::new()
        }
    }

    pub(crate) fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub(crate) fn replace(&self, edit: impl FnOnce(&mut CredentialSet)) {
        let mut current = self.current.lock().unwrap();
        let mut next = (**current).clone();
        edit(&mut next);
        *current = Arc::new(next);
    }
}

impl CredentialSource for CountingSource {
    fn current(&self) -> Arc<CredentialSet> {
        self.current.lock().unwrap().clone()
    }

    fn refresh_if_available(&self) -> Result<bool, CredentialError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.broken && n > 1 {
            return Err(CredentialError::MissingField("POWERTRACK_COOKIE"));
        }
        self.replace(|set| set.cookie = format!("session={n}"));
        Ok(true)
    }
}
