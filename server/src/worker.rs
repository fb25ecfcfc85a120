//! The offline cache worker
//!
//! Three handlers, invoked by the host:
//! - `install` precaches the asset manifest into the current partition
//! - `activate` deletes every partition that isn't the current one
//! - `handle_fetch` answers intercepted requests: network-first with a shell
//!   fallback for navigations, cache-first with a network fallback otherwise

use crate::config::{ConfigError, WorkerConfig};
use crate::http::{RequestDescriptor, ResponseDescriptor};
use crate::lifecycle::FetchEvent;
use crate::network::{Network, NetworkError};
use crate::response_cache::{RequestKey, ResponseStore, StoreError};
use axum::http::Method;
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Precache of {locator} failed: {reason}")]
    Install { locator: String, reason: String },

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Outcome of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub partition: String,
    pub stored: usize,
}

/// Outcome of activation cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

pub struct OfflineCacheWorker {
    config: Arc<WorkerConfig>,
    store: Arc<dyn ResponseStore>,
    network: Arc<dyn Network>,
}

impl OfflineCacheWorker {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn ResponseStore>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            config,
            store,
            network,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ResponseStore {
        self.store.as_ref()
    }

    fn partition(&self) -> &str {
        self.config.cache_version().as_str()
    }

    /// Precache every manifest locator into the current partition
    ///
    /// All locators are fetched before anything is written; one failed fetch or
    /// non-ok status fails the whole install and stores nothing.
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        let partition = self.partition();
        info!("Installing cache version {}", partition);

        self.store.open(partition).await?;

        let urls = self.config.precache_urls()?;
        let fetches = urls.iter().map(|url| async move {
            let request = RequestDescriptor::get(url.clone());
            match self.network.fetch(&request).await {
                Ok(response) if response.is_ok() => Ok((RequestKey::get(url), response)),
                Ok(response) => Err(WorkerError::Install {
                    locator: url.to_string(),
                    reason: format!("status {}", response.status),
                }),
                Err(e) => Err(WorkerError::Install {
                    locator: url.to_string(),
                    reason: e.to_string(),
                }),
            }
        });
        let entries = try_join_all(fetches).await?;

        self.store.put_all(partition, &entries).await?;
        debug!("Precached {:?}", urls.iter().map(|u| u.as_str()).collect::<Vec<_>>());

        Ok(InstallReport {
            partition: partition.to_string(),
            stored: entries.len(),
        })
    }

    /// Delete every partition other than the current one
    ///
    /// Deletions run concurrently and independently; a failed deletion is
    /// reported but doesn't stop the others.
    pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        let current = self.partition();
        info!("Activating cache version {}", current);

        let stale: Vec<String> = self
            .store
            .partitions()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let deletions = stale.iter().map(|name| async move {
            (name, self.store.delete_partition(name).await)
        });

        let mut report = ActivateReport::default();
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(_) => {
                    info!("Deleted stale cache {}", name);
                    report.deleted.push(name.clone());
                }
                Err(e) => {
                    warn!("Failed to delete stale cache {}: {}", name, e);
                    report.failed.push(name.clone());
                }
            }
        }

        Ok(report)
    }

    /// Answer an intercepted request
    pub async fn handle_fetch(&self, event: &FetchEvent) -> Result<ResponseDescriptor, WorkerError> {
        let request = event.request();
        if request.is_navigation() {
            self.network_first(request).await
        } else {
            self.cache_first(event).await
        }
    }

    /// Send a request to the network untouched
    pub async fn passthrough(
        &self,
        request: &RequestDescriptor,
    ) -> Result<ResponseDescriptor, WorkerError> {
        Ok(self.network.fetch(request).await?)
    }

    async fn network_first(
        &self,
        request: &RequestDescriptor,
    ) -> Result<ResponseDescriptor, WorkerError> {
        match self.network.fetch(request).await {
            Ok(response) if response.is_ok() => Ok(response),
            Ok(response) => {
                debug!(
                    "Navigation to {} returned {}, serving shell",
                    request.url, response.status
                );
                Ok(self.cached_shell().await.unwrap_or(response))
            }
            Err(e) => {
                warn!("Network error for navigation to {}, serving shell", request.url);
                self.cached_shell().await.ok_or(WorkerError::Network(e))
            }
        }
    }

    async fn cache_first(&self, event: &FetchEvent) -> Result<ResponseDescriptor, WorkerError> {
        let request = event.request();
        let key = RequestKey::from_request(request);
        let cacheable_method = request.method == Method::GET;

        if cacheable_method {
            if let Some(hit) = self.lookup(&key).await {
                debug!("Serving from cache: {}", request.url);
                return Ok(hit);
            }
        }

        let response = match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                if request.accepts_html() {
                    if let Some(shell) = self.cached_shell().await {
                        debug!("Network error for {}, serving shell", request.url);
                        return Ok(shell);
                    }
                }
                return Err(WorkerError::Network(e));
            }
        };

        if cacheable_method && response.is_cacheable() {
            let store = Arc::clone(&self.store);
            let partition = self.partition().to_string();
            let copy = response.clone();
            event.wait_until(async move {
                if let Err(e) = store.put(&partition, &key, &copy).await {
                    warn!("Failed to cache {}: {}", key, e);
                }
            });
        }

        Ok(response)
    }

    /// Look up a key in the current partition; a store failure counts as a miss
    async fn lookup(&self, key: &RequestKey) -> Option<ResponseDescriptor> {
        match self.store.lookup(self.partition(), key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", key, e);
                None
            }
        }
    }

    async fn cached_shell(&self) -> Option<ResponseDescriptor> {
        let shell = match self.config.shell_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot resolve shell document: {}", e);
                return None;
            }
        };
        self.lookup(&RequestKey::get(&shell)).await
    }
}
