//! Scripted network for unit tests

use crate::http::{RequestDescriptor, ResponseDescriptor};
use crate::network::{Network, NetworkError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Answers fetches from a fixed table of URL -> response and records every
/// request it was asked for. Unknown URLs fail as unreachable.
#[derive(Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<String, ResponseDescriptor>>,
    calls: Mutex<Vec<RequestDescriptor>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: ResponseDescriptor) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    /// Make a previously reachable URL unreachable
    pub fn go_offline(&self) {
        self.routes.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.url.to_string())
            .collect()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.requests_to(url).len()
    }

    /// Requests as they reached the network, headers included
    pub fn requests_to(&self, url: &str) -> Vec<RequestDescriptor> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.as_str() == url)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, NetworkError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(request.clone());

        self.routes
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .ok_or(NetworkError::Transport {
                url,
                reason: "unreachable".to_string(),
            })
    }
}
