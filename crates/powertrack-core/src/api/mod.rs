//! REST API client module for the PowerTrack platform.
//!
//! This module provides the `RequestClient` for issuing authenticated
//! requests with bounded retries. The platform authenticates with a browser
//! session (cookie plus anti-forgery token) supplied by a
//! [`CredentialSource`](crate::auth::CredentialSource); a 401 asks that source
//! for fresher credentials before retrying.

pub mod client;
pub mod error;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Payload, RequestClient, ResponseBody, REQUEST_TIMEOUT};
pub use error::{ApiError, AUTH_REMEDIATION};
pub use retry::RetryPolicy;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
