//! Transition detection between consecutive probe outcomes.

use serde::Serialize;

use crate::db::{CheckStatus, DbError, StateStore};

/// How an endpoint's status changed since its previous probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transition {
    None,
    BecameDown,
    Recovered,
}

impl Transition {
    /// Compare the stored status with a fresh one.
    ///
    /// The first observation of an endpoint is never a transition, whatever
    /// its status.
    pub fn between(previous: Option<CheckStatus>, current: CheckStatus) -> Self {
        match (previous, current) {
            (Some(CheckStatus::Up), CheckStatus::Down) => Transition::BecameDown,
            (Some(CheckStatus::Down), CheckStatus::Up) => Transition::Recovered,
            _ => Transition::None,
        }
    }
}

/// Result of comparing a fresh status with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub transition: Transition,
    /// No status had been stored for the endpoint yet.
    pub first_observation: bool,
}

/// Read the stored status for `endpoint_id` and classify the change to
/// `current`. Reads only; calling it twice without a snapshot write in
/// between gives the same answer.
pub fn detect(
    store: &dyn StateStore,
    endpoint_id: i64,
    current: CheckStatus,
) -> Result<Detection, DbError> {
    let previous = store.read_previous_status(endpoint_id)?;
    Ok(Detection {
        transition: Transition::between(previous, current),
        first_observation: previous.is_none(),
    })
}
