//! Two-tier local caching for JSON data sources.
//!
//! Reads of collections and models go through a [`cache::SyncCoordinator`],
//! which serves cached data when it can and otherwise reads from a
//! [`transport::RemoteTransport`], writing the result back per the resolved
//! cache policy.

pub mod app;
pub mod cache;
pub mod config;
pub mod entity;
pub mod event;
pub mod transport;

pub use app::Application;
pub use cache::{CacheResult, CacheSource, Expiry, FetchOptions, SyncCoordinator, SyncError};
pub use entity::{Collection, Model};
