//! Worker lifecycle as driven by the host
//!
//! The host owns the state machine (`parsed → installing → installed →
//! activating → active`, or `redundant` on failure) and the set of pending
//! extended-lifetime work registered by fetch handlers.

use crate::http::{RequestDescriptor, ResponseDescriptor};
use crate::worker::{OfflineCacheWorker, WorkerError};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

/// Handle through which a handler keeps work alive past its own return
///
/// Work registered with `wait_until` is tracked by the host, which waits
/// for all of it before shutting down.
#[derive(Clone)]
pub struct ExtendableEvent {
    tracker: TaskTracker,
}

impl ExtendableEvent {
    pub fn new(tracker: TaskTracker) -> Self {
        Self { tracker }
    }

    /// Run `work` in the background; the host will not stop until it settles
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(work);
    }
}

/// A request intercepted while the worker is active
pub struct FetchEvent {
    request: RequestDescriptor,
    lifetime: ExtendableEvent,
}

impl FetchEvent {
    pub fn new(request: RequestDescriptor, lifetime: ExtendableEvent) -> Self {
        Self { request, lifetime }
    }

    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.lifetime.wait_until(work);
    }
}

/// Drives one worker through its lifecycle and dispatches fetches to it
pub struct WorkerHost {
    worker: Arc<OfflineCacheWorker>,
    state: watch::Sender<WorkerState>,
    tracker: TaskTracker,
}

impl WorkerHost {
    pub fn new(worker: Arc<OfflineCacheWorker>) -> Self {
        let (state, _) = watch::channel(WorkerState::Parsed);
        Self {
            worker,
            state,
            tracker: TaskTracker::new(),
        }
    }

    pub fn worker(&self) -> &OfflineCacheWorker {
        &self.worker
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        info!("Worker state {:?} -> {:?}", previous, next);
    }

    /// Install, then activate
    ///
    /// A failed install leaves the worker redundant and is returned to the caller.
    /// A failed activation is logged; the worker still takes control.
    pub async fn start(&self) -> Result<(), WorkerError> {
        self.transition(WorkerState::Installing);
        match self.worker.install().await {
            Ok(report) => {
                info!(
                    "Precached {} responses into {}",
                    report.stored, report.partition
                );
                self.transition(WorkerState::Installed);
            }
            Err(e) => {
                error!("Install failed: {}", e);
                self.transition(WorkerState::Redundant);
                return Err(e);
            }
        }

        self.transition(WorkerState::Activating);
        match self.worker.activate().await {
            Ok(report) => {
                if !report.failed.is_empty() {
                    warn!(
                        "Could not delete {} stale partitions: {:?}",
                        report.failed.len(),
                        report.failed
                    );
                }
            }
            Err(e) => warn!("Activation cleanup failed: {}", e),
        }
        self.transition(WorkerState::Active);
        Ok(())
    }

    /// Hand a request to the worker, or straight to the network if it is not active yet
    pub async fn dispatch_fetch(
        &self,
        request: RequestDescriptor,
    ) -> Result<ResponseDescriptor, WorkerError> {
        if self.state() != WorkerState::Active {
            return self.worker.passthrough(&request).await;
        }

        let event = FetchEvent::new(request, ExtendableEvent::new(self.tracker.clone()));
        self.worker.handle_fetch(&event).await
    }

    /// Number of background tasks still pending
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting extended work and wait for what is pending
    pub async fn drain(&self) {
        self.tracker.close();
        info!("Waiting for {} pending cache writes", self.tracker.len());
        self.tracker.wait().await;
        self.transition(WorkerState::Redundant);
    }
}
