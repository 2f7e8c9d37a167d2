//! In-memory client for dry runs and tests.
//!
//! This provides a [`UserStateClient`] backed by a `HashMap`. The client is [`Clone`] so tests can
//! hold a handle for direct inspection while a load test owns another copy.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use csm_types::{BlockData, UsageKey};

use crate::{BlockStates, Result, UserStateClient};

type Store = HashMap<(String, UsageKey), BlockData>;

/// A call received by an [`InMemoryClient`] with call recording enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// A call to [`UserStateClient::get_many`].
    GetMany {
        /// The user whose state was read.
        username: String,
        /// The requested blocks.
        keys: BTreeSet<UsageKey>,
    },
    /// A call to [`UserStateClient::set_many`].
    SetMany {
        /// The user whose state was written.
        username: String,
        /// The written blocks.
        blocks: BTreeMap<UsageKey, BlockData>,
    },
}

/// A [`UserStateClient`] keeping all state in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClient {
    store: Arc<Mutex<Store>>,
    calls: Option<Arc<Mutex<Vec<Call>>>>,
}

impl InMemoryClient {
    /// Creates an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty client that records every call it receives.
    ///
    /// Recorded calls are kept until the client is dropped, so this is meant for tests.
    pub fn recording() -> Self {
        Self {
            store: Default::default(),
            calls: Some(Default::default()),
        }
    }

    /// Returns all recorded calls in order.
    ///
    /// Returns an empty list if recording is disabled.
    pub fn calls(&self) -> Vec<Call> {
        match &self.calls {
            Some(calls) => calls.lock().unwrap().clone(),
            None => Vec::new(),
        }
    }

    /// Returns a clone of the state stored for a user and block, if present.
    pub fn get_stored(&self, username: &str, key: &UsageKey) -> Option<BlockData> {
        self.store
            .lock()
            .unwrap()
            .get(&(username.to_owned(), key.clone()))
            .cloned()
    }

    /// Returns the number of blocks with stored state, across all users.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Returns `true` if no state is stored.
    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().is_empty()
    }

    fn record(&self, call: impl FnOnce() -> Call) {
        if let Some(calls) = &self.calls {
            calls.lock().unwrap().push(call());
        }
    }
}

#[async_trait::async_trait]
impl UserStateClient for InMemoryClient {
    async fn get_many(&self, username: &str, keys: &BTreeSet<UsageKey>) -> Result<BlockStates> {
        self.record(|| Call::GetMany {
            username: username.to_owned(),
            keys: keys.clone(),
        });

        let store = self.store.lock().unwrap();
        let blocks = keys
            .iter()
            .filter_map(|key| {
                let data = store.get(&(username.to_owned(), key.clone()))?;
                Some((key.clone(), data.clone()))
            })
            .collect();

        Ok(blocks)
    }

    async fn set_many(&self, username: &str, blocks: BTreeMap<UsageKey, BlockData>) -> Result<()> {
        self.record(|| Call::SetMany {
            username: username.to_owned(),
            blocks: blocks.clone(),
        });

        let mut store = self.store.lock().unwrap();
        for (key, data) in blocks {
            store
                .entry((username.to_owned(), key))
                .or_default()
                .extend(data);
        }

        Ok(())
    }
}
