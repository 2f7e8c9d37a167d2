//! Shared types for the courseware student module (CSM) load tests.
//!
//! - [`UsageKey`] identifies a single content block within a course.
//! - [`BlockData`] is the simulated per-field student state stored for a block.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod block;
pub mod key;

pub use block::{BlockData, serialized_size};
pub use key::{BlockType, CourseKey, InvalidKeyError, UsageKey};
