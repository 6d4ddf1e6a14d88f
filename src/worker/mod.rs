//! The asset cache manager and the lifecycle it is driven through.
//!
//! A deployed version goes through install (shell population), activation
//! (stale store purge, client claim) and then serves requests. Content
//! population runs only when the hosting page asks for it.

mod lifecycle;
mod manager;
mod message;
mod settings;

pub use lifecycle::{ClientId, WorkerState};
pub use manager::{ActivationReport, AssetCacheManager, PopulationReport};
pub use message::HostMessage;
