//! Status transition validation.
//!
//! Every long-lived entity carries a [`Status`] whose moves are checked
//! against an immutable table before a watcher patches it. The tables live in
//! [`tables`]; this module only knows how to read them.

use std::fmt;

use scanwarden_model::Status;

use crate::error::{OrchestratorError, Result};

mod tables;

pub use tables::{
    ASSET_SCAN, ASSET_SCAN_ESTIMATION, RESOURCE_CLEANUP, SCAN, SCAN_ESTIMATION,
};

/// A state/reason transition validator for one entity type.
///
/// A state missing from `transitions` has no outgoing edges. A state missing
/// from `reasons` accepts no reason at all, so any status in it is invalid.
pub struct StateMachine<S: 'static, R: 'static> {
    name: &'static str,
    transitions: &'static [(S, &'static [S])],
    reasons: &'static [(S, &'static [R])],
}

impl<S, R> fmt::Debug for StateMachine<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("states_with_edges", &self.transitions.len())
            .finish()
    }
}

impl<S, R> StateMachine<S, R>
where
    S: Copy + PartialEq + fmt::Display,
    R: Copy + PartialEq + fmt::Display,
{
    pub const fn new(
        name: &'static str,
        transitions: &'static [(S, &'static [S])],
        reasons: &'static [(S, &'static [R])],
    ) -> Self {
        Self {
            name,
            transitions,
            reasons,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Same state, reason and message. The transition time is ignored.
    pub fn equal(a: &Status<S, R>, b: &Status<S, R>) -> bool {
        a.state == b.state && a.reason == b.reason && a.message == b.message
    }

    pub fn allowed_next(&self, from: S) -> &'static [S] {
        self.transitions
            .iter()
            .find(|(state, _)| *state == from)
            .map(|(_, next)| *next)
            .unwrap_or(&[])
    }

    pub fn allowed_reasons(&self, state: S) -> &'static [R] {
        self.reasons
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, reasons)| *reasons)
            .unwrap_or(&[])
    }

    pub fn is_valid_edge(&self, from: S, to: S) -> bool {
        self.allowed_next(from).contains(&to)
    }

    /// Checks that `to.reason` belongs to `to.state`.
    pub fn validate_reason(&self, to: &Status<S, R>) -> Result<()> {
        if self.allowed_reasons(to.state).contains(&to.reason) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidReason {
                machine: self.name,
                state: to.state.to_string(),
                reason: to.reason.to_string(),
            })
        }
    }

    /// Accepts `from -> to` when the two are equal, otherwise requires a
    /// reason valid for the target state and an edge in the table. The reason
    /// check runs first.
    pub fn is_valid_transition(&self, from: &Status<S, R>, to: &Status<S, R>) -> Result<()> {
        if Self::equal(from, to) {
            return Ok(());
        }
        self.validate_reason(to)?;
        if !self.is_valid_edge(from.state, to.state) {
            return Err(OrchestratorError::InvalidTransition {
                machine: self.name,
                from: from.state.to_string(),
                to: to.state.to_string(),
            });
        }
        Ok(())
    }

    /// Validates `next` against the entity's current status. An entity with
    /// no status yet only needs a valid reason.
    pub fn advance(&self, current: Option<&Status<S, R>>, next: &Status<S, R>) -> Result<()> {
        match current {
            Some(current) => self.is_valid_transition(current, next),
            None => self.validate_reason(next),
        }
    }
}
