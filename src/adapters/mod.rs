//! Source adapters (§4, "Source adapters (N)"): independent producers of
//! `NewName` events. Each adapter is handed a bus reference and a root
//! domain and runs to completion (or streams) on its own thread.

pub mod http_scrape;
pub mod static_list;

use std::sync::Arc;

use crate::bus::EventBus;

/// Common shape every adapter implements so the driver can start a
/// homogeneous list of them without matching on adapter type.
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, bus: Arc<EventBus>, domain: &str);
}
