//! A load test for the courseware student module (CSM) user state storage.
//!
//! Every virtual user runs a [`CsmLoadModel`], which reads and writes block state for a single
//! learner. The model reproduces the request shapes observed in production:
//!
//! - Written blocks follow a heavy-tailed *Pareto* distribution of serialized sizes, so most
//!   writes are tiny while a few are very large.
//! - Reads request a *Pareto* distributed number of blocks, which the same virtual user wrote
//!   earlier in the session.
//!
//! Virtual users are grouped into profiles sharing wait times and task weights. The
//! [`loadtest::run`] function runs all profiles concurrently and returns a [`metrics::Report`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod loadtest;
pub mod metrics;
pub mod observability;
pub mod workload;

pub use crate::loadtest::{Scenario, run};
pub use crate::workload::CsmLoadModel;
