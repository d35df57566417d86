//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::host::HostHandle;
use crate::session::WsRelay;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: WsRelay,
    pub host: HostHandle,
}

impl AppState {
    pub fn new(config: Config, relay: WsRelay, host: HostHandle) -> Self {
        Self {
            config: Arc::new(config),
            relay,
            host,
        }
    }
}
