//! Workflow stages and phases
//!
//! Two progressions live in the state document:
//!
//! - [`Stage`] is the coarse three-step progression the store enforces on
//!   transition (stage1 -> stage2 -> stage3, no skipping, no going back).
//! - [`Phase`] is the finer, totally ordered list the rule engine compares
//!   against. It is derived from `sandwich_status` and never stored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::SandwichStatus;
use crate::error::{RuleError, StoreError};

/// Coarse workflow stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Foundation: manual coding by the researcher
    #[default]
    Stage1,
    /// Collaboration: parallel streams and synthesis
    Stage2,
    /// Synthesis: terminal stage
    Stage3,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Stage1, Stage::Stage2, Stage::Stage3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stage1 => "stage1",
            Self::Stage2 => "stage2",
            Self::Stage3 => "stage3",
        }
    }

    /// Human-readable name used in status summaries
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Stage1 => "Foundation (Stage 1)",
            Self::Stage2 => "Collaboration (Stage 2)",
            Self::Stage3 => "Synthesis (Stage 3)",
        }
    }

    /// Stages reachable from this one
    pub fn valid_transitions(&self) -> &'static [Stage] {
        match self {
            Self::Stage1 => &[Stage::Stage2],
            Self::Stage2 => &[Stage::Stage3],
            Self::Stage3 => &[],
        }
    }

    pub fn can_transition_to(&self, next: Stage) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| StoreError::UnknownStage(s.to_string()))
    }
}

/// Fine-grained phase, in workflow order
///
/// The derive order is the relaxation order: a rule relaxing at phase X is
/// relaxed in X and every phase after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Stage1Foundation,
    Phase1ParallelStreams,
    Phase2Synthesis,
    Phase3PatternCharacterization,
    CrossWaveAnalysis,
    Stage3Synthesis,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Stage1Foundation,
        Phase::Phase1ParallelStreams,
        Phase::Phase2Synthesis,
        Phase::Phase3PatternCharacterization,
        Phase::CrossWaveAnalysis,
        Phase::Stage3Synthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stage1Foundation => "stage1_foundation",
            Self::Phase1ParallelStreams => "phase1_parallel_streams",
            Self::Phase2Synthesis => "phase2_synthesis",
            Self::Phase3PatternCharacterization => "phase3_pattern_characterization",
            Self::CrossWaveAnalysis => "cross_wave_analysis",
            Self::Stage3Synthesis => "stage3_synthesis",
        }
    }

    /// Position in the ordered phase list
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Lenient lookup, `None` for names outside the list
    pub fn from_name(name: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::from_name(s).ok_or_else(|| RuleError::UnknownPhase(s.to_string()))
    }
}

/// `sandwich_status.current_stage` value for the collaboration stage
pub const STAGE2_COLLABORATION: &str = "stage2_collaboration";

fn progress_started(status: &SandwichStatus, phase: Phase) -> bool {
    status
        .stage2_progress
        .get(phase.as_str())
        .and_then(|v| v.as_str())
        .is_some_and(|s| s == "in_progress" || s == "complete")
}

/// Derive the current phase from the document's stage/progress fields
///
/// Pure projection. Missing or unrecognized data maps to the earliest phase.
pub fn current_phase(status: Option<&SandwichStatus>) -> Phase {
    let Some(status) = status else {
        debug!("current_phase: no sandwich_status, defaulting to earliest phase");
        return Phase::Stage1Foundation;
    };

    if status.current_stage == STAGE2_COLLABORATION {
        if progress_started(status, Phase::Phase3PatternCharacterization) {
            return Phase::Phase3PatternCharacterization;
        }
        if progress_started(status, Phase::Phase2Synthesis) {
            return Phase::Phase2Synthesis;
        }
        return Phase::Phase1ParallelStreams;
    }

    match Phase::from_name(&status.current_stage) {
        Some(phase) => phase,
        None => {
            debug!(stage = %status.current_stage, "current_phase: unrecognized stage, defaulting to earliest phase");
            Phase::Stage1Foundation
        }
    }
}

/// True iff `current` is at or after `relaxes_at`
///
/// An unknown `relaxes_at` name fails closed: the rule stays active.
pub fn should_relax(relaxes_at: &str, current: Phase) -> bool {
    match Phase::from_name(relaxes_at) {
        Some(relax_phase) => current.index() >= relax_phase.index(),
        None => {
            debug!(%relaxes_at, "should_relax: unknown phase name, rule stays active");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn status(stage: &str, progress: serde_json::Value) -> SandwichStatus {
        serde_json::from_value(json!({
            "current_stage": stage,
            "stage2_progress": progress,
        }))
        .unwrap()
    }

    #[test]
    fn test_stage_adjacency() {
        assert!(Stage::Stage1.can_transition_to(Stage::Stage2));
        assert!(!Stage::Stage1.can_transition_to(Stage::Stage3));
        assert!(!Stage::Stage2.can_transition_to(Stage::Stage1));
        assert!(Stage::Stage3.valid_transitions().is_empty());
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!("stage2".parse::<Stage>().unwrap(), Stage::Stage2);
        assert!(matches!("stage9".parse::<Stage>(), Err(StoreError::UnknownStage(_))));
    }

    #[test]
    fn test_phase_names_match_serde() {
        for phase in Phase::ALL {
            let encoded = serde_json::to_value(phase).unwrap();
            assert_eq!(encoded, json!(phase.as_str()));
        }
    }

    #[test]
    fn test_current_phase_missing_status() {
        assert_eq!(current_phase(None), Phase::Stage1Foundation);
    }

    #[test]
    fn test_current_phase_stage2_progress() {
        let s = status(STAGE2_COLLABORATION, json!({}));
        assert_eq!(current_phase(Some(&s)), Phase::Phase1ParallelStreams);

        let s = status(STAGE2_COLLABORATION, json!({"phase2_synthesis": "in_progress"}));
        assert_eq!(current_phase(Some(&s)), Phase::Phase2Synthesis);

        let s = status(
            STAGE2_COLLABORATION,
            json!({"phase2_synthesis": "complete", "phase3_pattern_characterization": "in_progress"}),
        );
        assert_eq!(current_phase(Some(&s)), Phase::Phase3PatternCharacterization);

        let s = status(STAGE2_COLLABORATION, json!({"phase2_synthesis": "not_started"}));
        assert_eq!(current_phase(Some(&s)), Phase::Phase1ParallelStreams);
    }

    #[test]
    fn test_current_phase_direct_and_unknown_stage() {
        let s = status("stage3_synthesis", json!({}));
        assert_eq!(current_phase(Some(&s)), Phase::Stage3Synthesis);

        let s = status("cross_wave_analysis", json!({}));
        assert_eq!(current_phase(Some(&s)), Phase::CrossWaveAnalysis);

        let s = status("somewhere_else", json!({}));
        assert_eq!(current_phase(Some(&s)), Phase::Stage1Foundation);
    }

    #[test]
    fn test_should_relax_unknown_phase_fails_closed() {
        assert!(!should_relax("phase9_unknown", Phase::Stage3Synthesis));
    }

    proptest! {
        #[test]
        fn prop_relaxation_follows_phase_order(relax in 0usize..6, current in 0usize..6) {
            let relax_phase = Phase::ALL[relax];
            let current_phase = Phase::ALL[current];
            prop_assert_eq!(should_relax(relax_phase.as_str(), current_phase), current >= relax);
        }
    }
}
