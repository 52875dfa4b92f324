pub mod config;
pub mod drawing;
pub mod error;
pub mod model;
pub mod server;
pub mod store;
pub mod sync;
pub mod websocket;

use std::sync::Arc;

use config::TabletopConfig;
use store::MemoryRoomStore;

/// Application state shared across all connections
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryRoomStore>,
    pub config: Arc<TabletopConfig>,
}

impl AppState {
    pub fn new(config: TabletopConfig) -> Self {
        Self {
            store: Arc::new(MemoryRoomStore::new(&config)),
            config: Arc::new(config),
        }
    }
}
