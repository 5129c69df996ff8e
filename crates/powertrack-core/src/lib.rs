//! Core library for the PowerTrack site collector.
//!
//! - [`auth`]: the credential store and browser capture parsing
//! - [`api`]: the retrying, self-refreshing request client
//! - [`fetch`]: per-site collection on top of the client
//! - [`output`], [`database`]: JSON files and SQLite persistence

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod fetch;
pub mod models;
pub mod output;
pub mod summaries;

pub use api::{ApiError, RequestClient, RetryPolicy};
pub use auth::{CredentialSource, CredentialStore};
pub use config::Config;
pub use database::SiteDatabase;
pub use fetch::SiteFetcher;
