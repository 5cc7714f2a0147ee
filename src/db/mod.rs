//! Database module for apiwatch.
//!
//! Provides SQLite storage for endpoints, check logs, state snapshots and
//! subscribers, plus the collaborator traits the monitor consumes.

mod import;
mod models;
mod store;
mod traits;

pub use import::*;
pub use models::*;
pub use store::*;
pub use traits::*;
