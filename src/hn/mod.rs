//! Clients for the two backing services: the Hacker News Firebase API
//! (per-item fetch, ranked top-story ids) and the Algolia search API
//! (time-windowed and free-text id search).

pub mod api_types;
pub mod client;

pub use client::HnClient;
