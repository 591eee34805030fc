//! tidestomes library
//!
//! Cached, retrying clients for the weather, marine feature and fishing-vessel
//! APIs behind the tidestomes CLI. Exposed as a library for integration tests.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod data;
pub mod http;
pub mod logging;
pub mod refresh;

pub use client::{ApiClient, ClientConfig, DataStatus, Resolved};
pub use http::{FetchError, FetchResult};
