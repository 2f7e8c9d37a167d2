//! Clients and event sinks for unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use csm_client::{BlockStates, Error, EventSink, RequestEvent, Result, UserStateClient};
use csm_types::{BlockData, UsageKey};

/// A [`UserStateClient`] that fails every call with [`Error::Storage`].
#[derive(Debug, Clone)]
pub struct FailingClient {
    message: String,
}

impl FailingClient {
    /// Creates a client failing with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
impl UserStateClient for FailingClient {
    async fn get_many(&self, _username: &str, _keys: &BTreeSet<UsageKey>) -> Result<BlockStates> {
        Err(Error::Storage(self.message.clone()))
    }

    async fn set_many(
        &self,
        _username: &str,
        _blocks: BTreeMap<UsageKey, BlockData>,
    ) -> Result<()> {
        Err(Error::Storage(self.message.clone()))
    }
}

/// An [`EventSink`] that keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RequestEvent>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events recorded so far.
    pub fn events(&self) -> Vec<RequestEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn record(&self, event: RequestEvent) {
        self.events.lock().unwrap().push(event);
    }
}
