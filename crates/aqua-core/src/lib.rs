//! Core domain models and database layer for the Aqua event delivery service.
//!
//! This crate provides the foundational types shared by the publishing facade
//! and the dispatch engine: strongly-typed identifiers, the domain event
//! record and its lifecycle states, the Postgres-backed event store, and the
//! clock abstraction that keeps scheduling logic testable.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{event_type, DomainEvent, EventId, EventStatus};
pub use storage::Storage;
pub use time::{Clock, RealClock, TestClock};
