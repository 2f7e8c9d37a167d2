//! Reporting of per-call latency and outcome.
//!
//! [`StatsClient`] decorates another [`UserStateClient`]. Every `get_many` and `set_many` call is
//! timed and reported as a [`RequestEvent`] to an [`EventSink`], whether it succeeds or fails.
//! Errors are still returned to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use csm_types::{BlockData, UsageKey};

use crate::{BlockStates, Result, UserStateClient};

/// Request type attached to every event emitted by [`StatsClient`].
pub const REQUEST_TYPE: &str = "UserStateClient";

/// The operations forwarded and reported by [`StatsClient`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// [`UserStateClient::get_many`]
    GetMany,
    /// [`UserStateClient::set_many`]
    SetMany,
}

impl Operation {
    /// Returns the name of the operation as reported in events.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::GetMany => "get_many",
            Operation::SetMany => "set_many",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a reported call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded.
    Success {
        /// Number of blocks returned by the call. Always `0` for writes.
        response_length: usize,
    },
    /// The call failed with the given error message.
    Failure {
        /// The display text of the error.
        error: String,
    },
}

/// A single timed call, as reported to an [`EventSink`].
#[derive(Clone, Debug)]
pub struct RequestEvent {
    /// The kind of client that issued the call, see [`REQUEST_TYPE`].
    pub request_type: &'static str,
    /// The operation that was called.
    pub operation: Operation,
    /// Wall-clock time at which the call was issued.
    pub start_time: SystemTime,
    /// Time until the call returned.
    pub response_time: Duration,
    /// Whether the call succeeded.
    pub outcome: Outcome,
}

impl RequestEvent {
    /// Returns `true` if the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }
}

/// Receives [`RequestEvent`]s from a [`StatsClient`].
pub trait EventSink: fmt::Debug + Send + Sync {
    /// Records a single event.
    fn record(&self, event: RequestEvent);
}

impl<T> EventSink for Arc<T>
where
    T: EventSink + ?Sized,
{
    fn record(&self, event: RequestEvent) {
        (**self).record(event)
    }
}

/// A [`UserStateClient`] that reports every call of the wrapped client to an [`EventSink`].
///
/// Failed calls are logged at `WARN` and returned unchanged.
#[derive(Debug)]
pub struct StatsClient<C, S> {
    inner: C,
    sink: S,
}

impl<C, S> StatsClient<C, S>
where
    C: UserStateClient,
    S: EventSink,
{
    /// Wraps `inner`, reporting to `sink`.
    pub fn new(inner: C, sink: S) -> Self {
        Self { inner, sink }
    }

    fn report<T>(
        &self,
        username: &str,
        operation: Operation,
        start_time: SystemTime,
        started: Instant,
        result: &Result<T>,
        response_length: impl FnOnce(&T) -> usize,
    ) {
        let response_time = started.elapsed();
        let outcome = match result {
            Ok(value) => Outcome::Success {
                response_length: response_length(value),
            },
            Err(error) => {
                tracing::warn!(
                    error = error as &dyn std::error::Error,
                    %operation,
                    %username,
                    "Request Failed"
                );
                Outcome::Failure {
                    error: error.to_string(),
                }
            }
        };

        self.sink.record(RequestEvent {
            request_type: REQUEST_TYPE,
            operation,
            start_time,
            response_time,
            outcome,
        });
    }
}

#[async_trait::async_trait]
impl<C, S> UserStateClient for StatsClient<C, S>
where
    C: UserStateClient,
    S: EventSink,
{
    async fn get_many(&self, username: &str, keys: &BTreeSet<UsageKey>) -> Result<BlockStates> {
        let start_time = SystemTime::now();
        let started = Instant::now();
        let result = self.inner.get_many(username, keys).await;
        self.report(username, Operation::GetMany, start_time, started, &result, Vec::len);
        result
    }

    async fn set_many(&self, username: &str, blocks: BTreeMap<UsageKey, BlockData>) -> Result<()> {
        let start_time = SystemTime::now();
        let started = Instant::now();
        let result = self.inner.set_many(username, blocks).await;
        self.report(username, Operation::SetMany, start_time, started, &result, |_| 0);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use csm_types::{BlockType, CourseKey};

    use super::*;
    use crate::{Error, InMemoryClient};

    #[derive(Debug, Default)]
    struct Events(Mutex<Vec<RequestEvent>>);

    impl EventSink for Events {
        fn record(&self, event: RequestEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait::async_trait]
    impl UserStateClient for Broken {
        async fn get_many(&self, _: &str, _: &BTreeSet<UsageKey>) -> Result<BlockStates> {
            Err(Error::Storage("connection reset".into()))
        }

        async fn set_many(&self, _: &str, _: BTreeMap<UsageKey, BlockData>) -> Result<()> {
            Err(Error::Storage("deadlock".into()))
        }
    }

    fn key() -> UsageKey {
        CourseKey::default()
            .make_usage_key(BlockType::Html, "1")
            .unwrap()
    }

    #[tokio::test]
    async fn reports_success() {
        let events = Arc::new(Events::default());
        let client = StatsClient::new(InMemoryClient::new(), events.clone());

        let blocks = BTreeMap::from([(key(), BlockData::new())]);
        client.set_many("alice", blocks).await.unwrap();
        let read = client
            .get_many("alice", &BTreeSet::from([key()]))
            .await
            .unwrap();
        assert_eq!(read.len(), 1);

        let events = events.0.lock().unwrap();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].request_type, REQUEST_TYPE);
        assert_eq!(events[0].operation, Operation::SetMany);
        assert_eq!(events[0].outcome, Outcome::Success { response_length: 0 });

        assert_eq!(events[1].operation, Operation::GetMany);
        assert_eq!(events[1].outcome, Outcome::Success { response_length: 1 });
    }

    #[tokio::test]
    async fn reports_and_returns_failure() {
        let events = Arc::new(Events::default());
        let client = StatsClient::new(Broken, events.clone());

        let err = client
            .get_many("alice", &BTreeSet::from([key()]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        let err = client.set_many("alice", BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "storage error: deadlock");

        let events = events.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_success());
        assert_eq!(
            events[0].outcome,
            Outcome::Failure {
                error: "storage error: connection reset".into()
            }
        );
        assert_eq!(events[1].operation, Operation::SetMany);
        assert!(!events[1].is_success());
    }
}
