//! Offline asset cache with two-phase population and network fallback.
//!
//! [`worker::AssetCacheManager`] owns one named cache store per deployed
//! version and answers every request of a hosting page from that store or
//! the network, according to the configured [`config::Strategy`]. The host
//! runtime (the `asset-cache` binary, or anything else that owns the
//! request-interception boundary) drives it through explicit method calls.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod net;
pub mod worker;
