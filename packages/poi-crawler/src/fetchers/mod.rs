//! Fetch gateway implementations.

pub mod http;

pub use http::HttpFetcher;
