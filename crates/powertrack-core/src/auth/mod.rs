//! Authentication module for managing PowerTrack session credentials.
//!
//! This module provides:
//! - `CredentialSet`: the cookie/token/header bundle sent with every request
//! - `CredentialStore`: env-file backed store that picks up fresh browser captures
//! - `FetchCapture`: parser for a DevTools "Copy as fetch (Node.js)" capture
//!
//! PowerTrack sessions cannot be created programmatically. A person logs in
//! with a browser, copies one API request as `fetch(...)` and pastes it into
//! the capture file; the store re-derives its credentials from that file
//! whenever it is newer than what was last applied.

pub mod capture;
pub mod credentials;
pub mod error;
pub mod store;

pub use capture::FetchCapture;
pub use credentials::{CredentialField, CredentialSet};
pub use error::CredentialError;
pub use store::{CredentialSource, CredentialStore};
