//! Runtime wiring for the raffle inventory server.
//!
//! The binary in `main.rs` loads [`config::Config`], connects `PostgreSQL` and the
//! optional Redis snapshot cache, starts the expiry reclaimer and serves the
//! HTTP router from `raffle-inventory-web`.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

pub mod config;
pub mod readiness;
pub mod stats_cache;

pub use config::{Config, ConfigError};
pub use readiness::DatabaseReadiness;
pub use stats_cache::RedisStatsCache;
