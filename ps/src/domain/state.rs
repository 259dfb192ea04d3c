//! ProjectState - the single authoritative document per project
//!
//! Only the fields the core interprets are typed. Every struct that other
//! tools may extend carries an `extra` bag (`#[serde(flatten)]`), so keys
//! this crate does not know survive a load/save round trip verbatim.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::phase::Stage;
use crate::branches::WorkspaceBranches;
use crate::rules::IsolationRule;
use crate::saturation::SaturationTracking;
use crate::strain::{OverrideRecord, StrainTracking};
use crate::team::ResearcherTeam;

/// The project document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectState {
    /// Bumped on every successful save; informational only
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub version: u64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub current_stage: Stage,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub documents_manually_coded: u64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub stage1_complete: bool,

    // Epistemic stance
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub ontology: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub epistemology: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub tradition: String,

    // Progress tracking
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub total_documents: u64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub documents_coded: u64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub memos_written: u64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub codes_created: u64,

    #[serde(deserialize_with = "super::timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "super::timestamp::deserialize_opt")]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub reflexivity_entries: Vec<Value>,

    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub project_name: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub research_question: String,

    /// Nested stage/progress fields the phase is derived from
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub sandwich_status: Option<SandwichStatus>,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub research_design: Option<ResearchDesign>,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub saturation_tracking: Option<SaturationTracking>,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub workspace_branches: Option<WorkspaceBranches>,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub researcher_team: Option<ResearcherTeam>,

    /// Top-level keys owned by other tools
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            version: 1,
            current_stage: Stage::Stage1,
            documents_manually_coded: 0,
            stage1_complete: false,
            ontology: "interpretivist".to_string(),
            epistemology: "systematic_interpretation".to_string(),
            tradition: "gioia_corley".to_string(),
            total_documents: 0,
            documents_coded: 0,
            memos_written: 0,
            codes_created: 0,
            created_at: None,
            last_updated: None,
            reflexivity_entries: Vec::new(),
            project_name: String::new(),
            research_question: String::new(),
            sandwich_status: None,
            research_design: None,
            saturation_tracking: None,
            workspace_branches: None,
            researcher_team: None,
            extra: Map::new(),
        }
    }
}

impl ProjectState {
    /// Fresh document stamped with its creation time
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: Some(now),
            ..Default::default()
        }
    }

    /// Research design section, created on first use
    pub fn research_design_mut(&mut self) -> &mut ResearchDesign {
        self.research_design.get_or_insert_with(ResearchDesign::default)
    }

    /// Saturation section, created on first use
    pub fn saturation_mut(&mut self) -> &mut SaturationTracking {
        self.saturation_tracking.get_or_insert_with(SaturationTracking::default)
    }

    /// Branch section, created with only the main branch on first use
    pub fn branches_mut(&mut self, now: DateTime<Utc>) -> &mut WorkspaceBranches {
        self.workspace_branches.get_or_insert_with(|| WorkspaceBranches::new(now))
    }

    /// Team section, created in single-researcher shape on first use
    pub fn team_mut(&mut self) -> &mut ResearcherTeam {
        self.researcher_team.get_or_insert_with(ResearcherTeam::default)
    }

    /// Copy of the document with the fields a save always rewrites cleared
    ///
    /// Two documents with equal normalized forms differ only in bookkeeping.
    pub fn without_bookkeeping(&self) -> Self {
        Self {
            version: 0,
            last_updated: None,
            ..self.clone()
        }
    }
}

/// Stage and per-phase progress as recorded by the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandwichStatus {
    /// `stage1_foundation`, `stage2_collaboration`, `stage3_synthesis`
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub current_stage: String,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub stage1_complete: Option<bool>,

    /// Phase name -> `not_started` | `in_progress` | `complete`
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub stage2_progress: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SandwichStatus {
    fn default() -> Self {
        Self {
            current_stage: "stage1_foundation".to_string(),
            stage1_complete: None,
            stage2_progress: Map::new(),
            extra: Map::new(),
        }
    }
}

/// Methodology configuration and rule bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchDesign {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub methodology_preset: Option<String>,

    /// Rule key (`case_isolation`) -> rule configuration
    #[serde(deserialize_with = "crate::domain::lenient::map")]
    pub isolation_config: BTreeMap<String, IsolationRule>,

    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub cases: Vec<Value>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub waves: Vec<Value>,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub strain_tracking: Option<StrainTracking>,

    /// Every recorded override, append-only
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub rule_overrides: Vec<OverrideRecord>,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub proactive_prompts: Option<ProactivePrompts>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResearchDesign {
    /// Strain section, created on first use
    pub fn strain_mut(&mut self) -> &mut StrainTracking {
        self.strain_tracking.get_or_insert_with(StrainTracking::default)
    }
}

/// Proactive prompt settings written by preset application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProactivePrompts {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub enabled: bool,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub cooldown_turns: u32,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub suppressed_prompts: Vec<String>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub prompt_history: Vec<Value>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub active_prompts: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ProactivePrompts {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_turns: 5,
            suppressed_prompts: Vec::new(),
            prompt_history: Vec::new(),
            active_prompts: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_document_shape() {
        let state = ProjectState::default();
        assert_eq!(state.version, 1);
        assert_eq!(state.current_stage, Stage::Stage1);
        assert_eq!(state.tradition, "gioia_corley");

        let encoded = serde_json::to_value(&state).unwrap();
        assert_eq!(encoded["current_stage"], json!("stage1"));
        assert!(encoded.get("sandwich_status").is_none());
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let raw = json!({
            "version": 7,
            "current_stage": "stage2",
            "dashboard_layout": {"columns": 3},
            "research_design": {
                "cases": ["A", "B"],
                "literature_sweep": {"last_run": "yesterday"}
            },
            "sandwich_status": {
                "current_stage": "stage2_collaboration",
                "reviewer_notes": "keep"
            }
        });

        let state: ProjectState = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(state.extra["dashboard_layout"], json!({"columns": 3}));

        let encoded = serde_json::to_value(&state).unwrap();
        assert_eq!(encoded["dashboard_layout"], raw["dashboard_layout"]);
        assert_eq!(
            encoded["research_design"]["literature_sweep"],
            raw["research_design"]["literature_sweep"]
        );
        assert_eq!(encoded["sandwich_status"]["reviewer_notes"], json!("keep"));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let state: ProjectState = serde_json::from_value(json!({"project_name": "Study"})).unwrap();
        assert_eq!(state.project_name, "Study");
        assert_eq!(state.ontology, "interpretivist");
        assert_eq!(state.version, 1);
    }

    #[test]
    fn test_null_and_mistyped_fields_take_defaults() {
        let state: ProjectState = serde_json::from_value(json!({
            "version": "seven",
            "documents_coded": 4,
            "memos_written": null,
            "current_stage": "stage2_collaboration",
            "created_at": "sometime",
            "research_design": {
                "isolation_config": {"case_isolation": {"enabled": false}, "wave_isolation": "off"},
                "cases": {"A": 1},
                "proactive_prompts": {"enabled": "yes", "cooldown_turns": 9}
            }
        }))
        .unwrap();
        assert_eq!(state.version, 0);
        assert_eq!(state.documents_coded, 4);
        assert_eq!(state.memos_written, 0);
        assert_eq!(state.current_stage, Stage::Stage1);
        assert!(state.created_at.is_none());

        let design = state.research_design.unwrap();
        assert_eq!(design.isolation_config.len(), 1);
        assert_eq!(design.isolation_config["case_isolation"].enabled, Some(false));
        assert!(design.cases.is_empty());
        let prompts = design.proactive_prompts.unwrap();
        assert!(!prompts.enabled);
        assert_eq!(prompts.cooldown_turns, 9);
    }

    #[test]
    fn test_naive_timestamps_accepted() {
        let state: ProjectState =
            serde_json::from_value(json!({"created_at": "2025-01-15T09:00:00.250000", "last_updated": null})).unwrap();
        assert!(state.created_at.is_some());
        assert!(state.last_updated.is_none());
    }

    #[test]
    fn test_lazy_sections() {
        let mut state = ProjectState::default();
        state.research_design_mut().strain_mut().strain_threshold = 4;
        state.saturation_mut();
        assert!(state.research_design.is_some());
        assert!(state.saturation_tracking.is_some());
    }
}
