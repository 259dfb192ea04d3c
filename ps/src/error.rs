//! Error types
//!
//! Only failures the caller has to act on live here. A missing or corrupt
//! state document is recovered inside the store and reported through
//! [`crate::store::LoadOrigin`] instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::branches::BranchStatus;
use crate::domain::Stage;
use crate::friction::FrictionTrigger;
use crate::lock::LockMode;

/// Errors from acquiring or holding an advisory lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to acquire {mode} lock on {path}: {source}")]
    Acquire {
        mode: LockMode,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("In-process lock poisoned")]
    Poisoned,
}

/// Errors from reading or writing files on disk
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Invalid transition: {from} -> {to}. Valid transitions from {from}: [{allowed}]")]
    InvalidTransition { from: Stage, to: Stage, allowed: String },

    #[error("Cannot transition to {to}: only {have} documents manually coded (need {need})")]
    PreconditionNotMet { to: Stage, have: u64, need: u64 },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),
}

impl From<LockError> for StoreError {
    fn from(e: LockError) -> Self {
        Self::Persist(PersistError::Lock(e))
    }
}

/// Validation errors for rule, strain and preset inputs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("Unknown resolution type: {0} (expected phase_transition, adjust_rule or keep_rule)")]
    UnknownResolution(String),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Invalid preset catalog: {0}")]
    InvalidCatalog(String),
}

/// Rejected workspace branch operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BranchError {
    #[error("Branch \"{0}\" not found")]
    NotFound(String),

    #[error("Branch \"{id}\" is {status}")]
    Inactive { id: String, status: BranchStatus },

    #[error("Cannot {0} the main branch")]
    MainBranch(&'static str),

    #[error(
        "Merge requires a synthesis memo of at least {min} characters (got {len}) explaining what you learned and how you're integrating this exploration"
    )]
    MemoTooShort { min: usize, len: usize },

    #[error("Invalid framing: {0} (expected exploratory, confirmatory, negative_case or alternative_interpretation)")]
    InvalidFraming(String),

    #[error("Branch name must not be empty")]
    EmptyName,
}

/// Rejected researcher team operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeamError {
    #[error("Team member with ID \"{0}\" already exists")]
    DuplicateMember(String),

    #[error("Cannot derive a member ID from name \"{0}\"")]
    InvalidName(String),

    #[error("Invalid role: {0} (expected lead, co_investigator, coder, auditor or consultant)")]
    InvalidRole(String),

    #[error("Team member \"{0}\" not found")]
    MemberNotFound(String),

    #[error("Active team member \"{0}\" not found")]
    InactiveMember(String),

    #[error("Session \"{0}\" not found")]
    SessionNotFound(String),

    #[error("Invalid outcome type: {0} (expected code_merged, code_split, definition_refined or disagreement_noted)")]
    InvalidOutcome(String),

    #[error("Invalid action: {0} (expected coded_document, created_code, refined_code, wrote_memo or made_decision)")]
    InvalidAction(String),

    #[error("An ICR session needs at least one participant and one document")]
    EmptySession,
}

/// Errors from friction checks and bypasses
#[derive(Debug, Error)]
pub enum FrictionError {
    #[error("Unknown friction trigger: {0}")]
    UnknownTrigger(String),

    #[error("Friction trigger {0} cannot be bypassed")]
    NotBypassable(FrictionTrigger),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Errors surfaced by the [`crate::project::Project`] facade
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    Team(#[from] TeamError),

    #[error(transparent)]
    Friction(#[from] FrictionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_message_names_the_shortfall() {
        let err = StoreError::PreconditionNotMet {
            to: Stage::Stage2,
            have: 4,
            need: 10,
        };
        assert_eq!(
            err.to_string(),
            "Cannot transition to stage2: only 4 documents manually coded (need 10)"
        );
    }

    #[test]
    fn test_branch_error_messages() {
        let err = BranchError::Inactive {
            id: "alt-1".to_string(),
            status: BranchStatus::Merged,
        };
        assert_eq!(err.to_string(), "Branch \"alt-1\" is merged");
        assert_eq!(BranchError::MainBranch("abandon").to_string(), "Cannot abandon the main branch");
    }

    #[test]
    fn test_lock_error_converts_into_store_error() {
        let err: StoreError = LockError::Poisoned.into();
        assert!(matches!(err, StoreError::Persist(PersistError::Lock(LockError::Poisoned))));
    }
}
