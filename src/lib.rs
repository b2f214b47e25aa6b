//! Offline-capable Hacker News reader core.
//!
//! Two cooperating cache subsystems: the server side aggregates full comment
//! trees from the public content API into a disk-backed store on a periodic
//! refresh schedule and serves them over HTTP; the client side keeps a
//! durable local cache of visited content so last-seen stories keep
//! rendering when the network is gone.

pub mod client;
pub mod config;
pub mod hn;
pub mod hydrator;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;
