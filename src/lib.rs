pub mod cache;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod export;
pub mod fetch;
pub mod liveness;
pub mod models;
pub mod resolution;
pub mod source;
pub mod stats;
pub mod window;
