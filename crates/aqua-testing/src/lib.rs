//! Test doubles and fixtures for the messaging stack.
//!
//! Provides broker doubles that record, fail, or flake on sends, a builder
//! for event rows in arbitrary states, and the deterministic clock
//! re-exported from `aqua-core`. Used by unit and integration tests across
//! the workspace.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod broker;
pub mod fixtures;

pub use aqua_core::{Clock, TestClock};
pub use broker::{FailingBroker, FlakyBroker, RecordingBroker};
pub use fixtures::{pending_event, EventBuilder};
