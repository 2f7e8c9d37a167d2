//! # CSM User State Client
//!
//! Clients for the courseware student module (CSM) user state storage. The storage itself lives in
//! an external service; this crate only describes the operations the load tests issue against it.
//!
//! - [`UserStateClient`] is the contract: `get_many` and `set_many` for a single user.
//! - [`HttpUserStateClient`] talks to the service over JSON/HTTP, using the current
//!   [`ConnectionSettings`] for every request.
//! - [`InMemoryClient`] keeps state in process, for dry runs and tests.
//! - [`StatsClient`] wraps any client and reports the latency and outcome of every call to an
//!   [`EventSink`].
//!
//! ## Usage
//!
//! ```no_run
//! use std::collections::BTreeMap;
//!
//! use csm_client::{ConnectionSettings, HttpUserStateClient, SettingsHandle, UserStateClient};
//! use csm_types::{BlockData, BlockType, CourseKey};
//!
//! # async fn example() -> csm_client::Result<()> {
//! let settings = SettingsHandle::new(ConnectionSettings::default());
//! let client = HttpUserStateClient::builder(settings).build()?;
//!
//! let key = CourseKey::default().make_usage_key(BlockType::Problem, "1").unwrap();
//! let data = BlockData::from([("0".to_owned(), "42".to_owned())]);
//! client.set_many("learner", BTreeMap::from([(key, data)])).await?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod client;
mod error;
mod http;
mod memory;
mod settings;
mod stats;

pub use client::*;
pub use error::*;
pub use http::*;
pub use memory::*;
pub use settings::*;
pub use stats::*;
