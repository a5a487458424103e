//! Revocation lifecycle of an outstanding secret.
//!
//! ```text
//! Active ──► Revoking ──► Revoked
//!                │
//!                └──────► RevokeFailed ──► Revoking (retry)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationState {
    Active,
    Revoking,
    Revoked,
    RevokeFailed,
}

impl RevocationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoking => "revoking",
            Self::Revoked => "revoked",
            Self::RevokeFailed => "revoke_failed",
        }
    }

    /// Enter `Revoking`.
    ///
    /// Returns `Ok(false)` when the secret is already revoked, so a second
    /// revoke can report success without touching the backend.
    pub fn begin(&mut self) -> Result<bool> {
        match self {
            Self::Active | Self::RevokeFailed => {
                *self = Self::Revoking;
                Ok(true)
            }
            Self::Revoked => Ok(false),
            Self::Revoking => Err(Error::internal("revocation already in progress")),
        }
    }

    /// Record the outcome of the revoke callback.
    pub fn finish(&mut self, succeeded: bool) {
        if *self == Self::Revoking {
            *self = if succeeded { Self::Revoked } else { Self::RevokeFailed };
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::Revoked
    }
}

impl fmt::Display for RevocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks which cleanup steps of a multi-step revocation have completed.
///
/// A failure before any step completed is returned unchanged; after that it
/// is wrapped in [`Error::PartialRevocation`] so the caller can see how far
/// the cleanup got.
#[derive(Debug, Default)]
pub struct RevocationSteps {
    completed: Vec<&'static str>,
}

impl RevocationSteps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&mut self, step: &'static str) {
        self.completed.push(step);
    }

    pub fn completed(&self) -> &[&'static str] {
        &self.completed
    }

    pub fn fail(&self, step: &'static str, error: Error) -> Error {
        if self.completed.is_empty() {
            error
        } else {
            Error::PartialRevocation {
                completed: self.completed.clone(),
                failed_step: step,
                source: Box::new(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = RevocationState::Active;
        assert!(state.begin().unwrap());
        assert_eq!(state, RevocationState::Revoking);
        state.finish(true);
        assert_eq!(state, RevocationState::Revoked);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_failed_revoke_can_be_retried() {
        let mut state = RevocationState::Active;
        state.begin().unwrap();
        state.finish(false);
        assert_eq!(state, RevocationState::RevokeFailed);

        assert!(state.begin().unwrap());
        state.finish(true);
        assert_eq!(state, RevocationState::Revoked);
    }

    #[test]
    fn test_second_revoke_is_a_no_op() {
        let mut state = RevocationState::Revoked;
        assert!(!state.begin().unwrap());
        assert_eq!(state, RevocationState::Revoked);
    }

    #[test]
    fn test_concurrent_begin_is_rejected() {
        let mut state = RevocationState::Revoking;
        assert!(state.begin().is_err());
    }

    #[test]
    fn test_steps_wrap_only_after_progress() {
        let mut steps = RevocationSteps::new();
        let first = steps.fail("revoke_connect", Error::upstream("sql", "login failed"));
        assert!(matches!(first, Error::Upstream { .. }));

        steps.complete("revoke_connect");
        steps.complete("drop_user");
        let later = steps.fail("delete_firewall_rule", Error::upstream("azure", "throttled"));
        match later {
            Error::PartialRevocation { completed, failed_step, .. } => {
                assert_eq!(completed, vec!["revoke_connect", "drop_user"]);
                assert_eq!(failed_step, "delete_firewall_rule");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&RevocationState::RevokeFailed).unwrap();
        assert_eq!(json, "\"revoke_failed\"");
    }
}
