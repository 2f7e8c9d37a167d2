use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use csm_types::{BlockData, UsageKey};

use crate::Result;

/// Stored blocks returned by [`UserStateClient::get_many`].
///
/// Blocks without stored state are omitted, so this may contain fewer entries than requested.
pub type BlockStates = Vec<(UsageKey, BlockData)>;

/// Access to the student state of individual users.
///
/// Both operations fail on any transport or storage error. There is no partial-result contract:
/// a failed call must be treated as if nothing was read or written.
#[async_trait::async_trait]
pub trait UserStateClient: Debug + Send + Sync {
    /// Reads the stored state of the given blocks for `username`.
    async fn get_many(&self, username: &str, keys: &BTreeSet<UsageKey>) -> Result<BlockStates>;

    /// Writes the state of the given blocks for `username`.
    ///
    /// Fields in `blocks` are merged into any state already stored for the same block.
    async fn set_many(&self, username: &str, blocks: BTreeMap<UsageKey, BlockData>) -> Result<()>;
}

#[async_trait::async_trait]
impl<T> UserStateClient for Arc<T>
where
    T: UserStateClient + ?Sized,
{
    async fn get_many(&self, username: &str, keys: &BTreeSet<UsageKey>) -> Result<BlockStates> {
        (**self).get_many(username, keys).await
    }

    async fn set_many(&self, username: &str, blocks: BTreeMap<UsageKey, BlockData>) -> Result<()> {
        (**self).set_many(username, blocks).await
    }
}

/// A type-erased, shareable [`UserStateClient`].
pub type BoxedClient = Arc<dyn UserStateClient>;
