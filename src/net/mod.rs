//! Network side of the manager: request identity and the fetcher.

mod client;
mod request;

pub use client::{Fetcher, HttpFetcher};
pub use request::AssetRequest;
