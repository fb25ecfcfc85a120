pub mod config;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod response_cache;
pub mod server;
pub mod worker;

// Re-export commonly used types
pub use config::{AssetManifest, BasePath, CacheVersion, ServerConfig, WorkerConfig};
pub use lifecycle::{WorkerHost, WorkerState};
pub use network::{HttpNetwork, Network};
pub use response_cache::ResponseStore;
pub use worker::{OfflineCacheWorker, WorkerError};

use url::Url;

pub type AppState = std::sync::Arc<ProxyState>;

pub struct ProxyState {
    pub host: WorkerHost,
    // Origin the intercepted requests are mapped onto
    pub upstream: Url,
}

impl ProxyState {
    pub fn new(host: WorkerHost, upstream: Url) -> Self {
        Self { host, upstream }
    }
}

impl std::fmt::Debug for ProxyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyState")
            .field("host", &"<WorkerHost>")
            .field("state", &self.host.state())
            .field("upstream", &self.upstream.as_str())
            .finish()
    }
}

#[cfg(test)]
mod testing;

#[cfg(test)]
mod server_test;
