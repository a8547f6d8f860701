//! HTTP plumbing shared by the REST data source.

mod api_key;
mod basic;
mod client;

pub use api_key::ApiKey;
pub use basic::BasicClient;
pub use client::HttpClient;
