//! Project - one project's store, event log and rule engine together
//!
//! Every mutating operation is load -> pure update -> save, followed by an
//! audit entry in the event log. The state document is authoritative: a
//! failed audit write is logged as a warning and does not undo or fail the
//! operation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::branches::{
    self, AbandonOutcome, BranchFraming, BranchList, BranchStatusReport, ForkOutcome, MergeOutcome, SwitchOutcome,
};
use crate::buffer::WriteBuffer;
use crate::config::Config;
use crate::domain::{Phase, ProjectState, Stage, current_phase};
use crate::error::{FrictionError, ProjectError, StoreError};
use crate::events::{EventLog, types};
use crate::friction::{FrictionCheck, FrictionContext, FrictionRecord, FrictionSummary, FrictionSystem, FrictionTrigger};
use crate::lock::{self, Locker, LockingInfo};
use crate::presets::{self, PresetCatalog, PresetOutcome};
use crate::rules::{self, RuleStatusReport};
use crate::saturation::{
    CoverageInput, CoverageOutcome, DocumentOutcome, RedundancyOutcome, RefinementOutcome, SaturationAssessment,
    SaturationStatus,
};
use crate::store::{StateStore, StatusSummary};
use crate::strain::{OverrideOutcome, Resolution, ResolutionOutcome, StrainDetector, StrainReport};
use crate::team::{
    self, Action, Assignment, Attribution, CurrentResearcher, MemberAdded, MemberListing, OutcomeType, PrimaryResearcher,
    Role, SessionCompleted, SessionStarted, TeamStatus,
};

const STRAIN_AGENT: &str = "strain-detector";
const BRANCH_AGENT: &str = "workspace_branch";
const TEAM_AGENT: &str = "researcher_team";

/// Result of [`Project::code_document`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodingOutcome {
    pub documents_coded: u64,
    pub documents_manually_coded: u64,
    /// Interpretive pause, when this document completed another five
    pub friction: Option<FrictionCheck>,
}

pub struct Project {
    root: PathBuf,
    config: Config,
    locker: Arc<dyn Locker>,
    store: StateStore,
    events: EventLog,
    friction: FrictionSystem,
    strain: StrainDetector,
}

impl Project {
    /// Open the project at `root`, picking the locker from `config.locking`
    pub fn open(root: impl AsRef<Path>, config: Config) -> Self {
        let locker = lock::detect(config.locking);
        Self::with_locker(root, config, locker)
    }

    pub fn with_locker(root: impl AsRef<Path>, config: Config, locker: Arc<dyn Locker>) -> Self {
        let root = root.as_ref().to_path_buf();
        debug!(?root, "Project::with_locker: called");
        Self {
            store: StateStore::new(&root, &config, Arc::clone(&locker)),
            events: EventLog::for_project(&root, &config, Arc::clone(&locker)),
            friction: FrictionSystem::for_project(&root, &config, Arc::clone(&locker)),
            strain: StrainDetector::new(config.strain_threshold),
            root,
            config,
            locker,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn friction(&self) -> &FrictionSystem {
        &self.friction
    }

    /// New write buffer for this project's reasoning records
    pub fn write_buffer(&self) -> WriteBuffer {
        WriteBuffer::for_project(&self.root, &self.config, Arc::clone(&self.locker))
    }

    fn audit(&self, event_type: &str, content: Value, agent: Option<&str>) {
        if let Err(e) = self.events.log_event(event_type, content, agent) {
            warn!(%event_type, error = %e, "Failed to write audit entry");
        }
    }

    pub fn load(&self) -> Result<ProjectState, ProjectError> {
        Ok(self.store.load()?)
    }

    pub fn status(&self) -> Result<StatusSummary, ProjectError> {
        Ok(self.store.status()?)
    }

    pub fn locking_info(&self) -> LockingInfo {
        self.store.locking_info()
    }

    pub fn current_phase(&self) -> Result<Phase, ProjectError> {
        let state = self.store.load()?;
        Ok(current_phase(state.sandwich_status.as_ref()))
    }

    /// Friction check whose failure only warns, like an audit entry
    fn friction_quietly(&self, trigger: FrictionTrigger, state: &ProjectState, ctx: &FrictionContext) -> Option<FrictionCheck> {
        match self.friction.check(trigger, state, ctx, Utc::now()) {
            Ok(check) => check,
            Err(e) => {
                warn!(%trigger, error = %e, "Failed to evaluate friction trigger");
                None
            }
        }
    }

    /// Move to the next stage and record the transition
    ///
    /// A stage2 request refused for too few manually coded documents also
    /// fires the `pre_stage2` friction trigger.
    pub fn transition_stage(&self, to: Stage, agent: Option<&str>) -> Result<ProjectState, ProjectError> {
        let from = self.store.load()?.current_stage;
        let state = match self.store.transition_stage(to) {
            Ok(state) => state,
            Err(e @ StoreError::PreconditionNotMet { .. }) => {
                if let Ok(current) = self.store.load() {
                    let ctx = FrictionContext {
                        requested_stage: Some(to),
                        ..Default::default()
                    };
                    self.friction_quietly(FrictionTrigger::PreStage2, &current, &ctx);
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        self.audit(types::STAGE_TRANSITION, json!({"from": from, "to": to}), agent);
        Ok(state)
    }

    /// Count one coded document, then check for an interpretive pause
    pub fn code_document(&self, manual: bool) -> Result<CodingOutcome, ProjectError> {
        let state = self.store.increment_document_count(manual)?;
        let friction = self.friction_quietly(FrictionTrigger::PostFiveDocuments, &state, &FrictionContext::default());
        Ok(CodingOutcome {
            documents_coded: state.documents_coded,
            documents_manually_coded: state.documents_manually_coded,
            friction,
        })
    }

    pub fn check_friction(&self, trigger: FrictionTrigger, ctx: &FrictionContext) -> Result<Option<FrictionCheck>, ProjectError> {
        let state = self.store.load()?;
        Ok(self
            .friction
            .check(trigger, &state, ctx, Utc::now())
            .map_err(FrictionError::from)?)
    }

    /// Record a bypass in the friction log and the audit trail
    pub fn record_friction_bypass(
        &self,
        trigger: FrictionTrigger,
        justification: Option<&str>,
    ) -> Result<FrictionRecord, ProjectError> {
        let record = self.friction.record_bypass(trigger, justification, Utc::now())?;
        self.audit(
            types::FRICTION_BYPASSED,
            json!({
                "trigger": trigger,
                "justification": justification.unwrap_or("None provided"),
            }),
            None,
        );
        Ok(record)
    }

    pub fn friction_summary(&self) -> Result<FrictionSummary, ProjectError> {
        Ok(self.friction.summary().map_err(FrictionError::from)?)
    }

    pub fn check_rules(&self) -> Result<RuleStatusReport, ProjectError> {
        let state = self.store.load()?;
        Ok(rules::check_rules(&state))
    }

    pub fn set_rule_enabled(&self, rule: &str, enabled: bool) -> Result<(), ProjectError> {
        self.store
            .try_update(|state| rules::set_rule_enabled(state, rule, enabled).map_err(ProjectError::from))?;
        self.audit(
            types::RULE_TOGGLED,
            json!({"rule": rules::rule_name(rule), "enabled": enabled}),
            None,
        );
        Ok(())
    }

    pub fn apply_preset(&self, catalog: &PresetCatalog, id: &str) -> Result<PresetOutcome, ProjectError> {
        let (_, outcome) = self
            .store
            .try_update(|state| presets::apply_preset(state, catalog, id).map_err(ProjectError::from))?;
        self.audit(
            types::METHODOLOGY_PRESET_APPLIED,
            json!({
                "message": format!("Applied methodology preset '{}' ({})", outcome.preset_name, id),
                "preset": id,
                "isolation_rules": outcome.isolation_rules,
            }),
            None,
        );
        Ok(outcome)
    }

    /// Count an override of `rule` in the current phase
    ///
    /// The first time the rule reaches the strain threshold the review
    /// prompt is returned and written to the event log.
    pub fn record_override(&self, rule: &str, justification: Option<&str>) -> Result<OverrideOutcome, ProjectError> {
        let (_, outcome) = self.store.try_update(|state| {
            let phase = current_phase(state.sandwich_status.as_ref());
            self.strain
                .record_override(state, rule, justification, phase, Utc::now())
                .map_err(ProjectError::from)
        })?;

        if outcome.first_time_strained {
            let message = format!(
                "Rule \"{}\" has reached the strain threshold ({} overrides in {})",
                outcome.rule_id, outcome.override_count, outcome.phase
            );
            self.audit(
                types::METHODOLOGICAL_STRAIN,
                json!({
                    "message": message,
                    "rule_id": outcome.rule_id,
                    "override_count": outcome.override_count,
                    "phase": outcome.phase,
                    "strain_prompt": outcome.strain_prompt,
                }),
                Some(STRAIN_AGENT),
            );
        }
        Ok(outcome)
    }

    pub fn check_strain(&self, rule: Option<&str>) -> Result<StrainReport, ProjectError> {
        let state = self.store.load()?;
        Ok(self.strain.check_strain(&state, rule))
    }

    pub fn record_resolution(
        &self,
        rule: &str,
        resolution: Resolution,
        notes: Option<&str>,
    ) -> Result<ResolutionOutcome, ProjectError> {
        let (_, outcome) = self.store.try_update(|state| {
            self.strain
                .record_resolution(state, rule, resolution, notes, Utc::now())
                .map_err(ProjectError::from)
        })?;
        self.audit(
            types::METHODOLOGICAL_STRAIN,
            json!({
                "message": format!("Strain review resolved for \"{}\"", outcome.rule_id),
                "rule_id": outcome.rule_id,
                "resolution": outcome.resolution,
                "notes": notes.unwrap_or("None provided"),
            }),
            Some(STRAIN_AGENT),
        );
        Ok(outcome)
    }

    pub fn record_document(&self, doc_id: &str, doc_name: Option<&str>, new_codes: u64) -> Result<DocumentOutcome, ProjectError> {
        let (_, outcome) = self
            .store
            .update(|state| state.saturation_mut().record_document(doc_id, doc_name, new_codes, Utc::now()))?;
        Ok(outcome)
    }

    pub fn record_refinement(
        &self,
        code_id: &str,
        change_type: &str,
        old_state: Option<&str>,
        new_state: Option<&str>,
        rationale: Option<&str>,
    ) -> Result<RefinementOutcome, ProjectError> {
        let (_, outcome) = self.store.update(|state| {
            state
                .saturation_mut()
                .record_refinement(code_id, change_type, old_state, new_state, rationale, Utc::now())
        })?;
        Ok(outcome)
    }

    /// Coverage is measured against the document's `documents_coded`
    pub fn update_coverage(&self, coverage: &BTreeMap<String, CoverageInput>) -> Result<CoverageOutcome, ProjectError> {
        let (_, outcome) = self.store.update(|state| {
            let documents_coded = state.documents_coded;
            state.saturation_mut().update_coverage(coverage, documents_coded)
        })?;
        Ok(outcome)
    }

    pub fn update_redundancy(&self, score: f64, notes: Option<&str>) -> Result<RedundancyOutcome, ProjectError> {
        let (_, outcome) = self
            .store
            .update(|state| state.saturation_mut().update_redundancy(score, notes, Utc::now()))?;
        Ok(outcome)
    }

    pub fn assess_saturation(&self) -> Result<SaturationAssessment, ProjectError> {
        let (_, assessment) = self.store.update(|state| state.saturation_mut().assess(Utc::now()))?;
        self.audit(
            types::SATURATION_ASSESSED,
            json!({
                "level": assessment.saturation_level,
                "score": assessment.saturation_score,
                "evidence": assessment.evidence,
            }),
            None,
        );
        Ok(assessment)
    }

    /// `None` until the first saturation update
    pub fn saturation_status(&self) -> Result<Option<SaturationStatus>, ProjectError> {
        let state = self.store.load()?;
        Ok(state.saturation_tracking.as_ref().map(|t| t.status()))
    }

    pub fn fork_branch(
        &self,
        name: &str,
        framing: Option<BranchFraming>,
        rationale: Option<&str>,
    ) -> Result<ForkOutcome, ProjectError> {
        let (_, outcome) = self.store.try_update(|state| {
            branches::fork(state, name, framing, rationale, Utc::now()).map_err(ProjectError::from)
        })?;
        self.audit(
            types::WORKSPACE_BRANCH,
            json!({
                "message": outcome.message,
                "action": "fork",
                "branch_id": outcome.branch_id,
                "forked_from": outcome.forked_from,
                "framing": outcome.framing,
                "rationale": rationale.unwrap_or_default(),
            }),
            Some(BRANCH_AGENT),
        );
        Ok(outcome)
    }

    pub fn switch_branch(&self, id: &str) -> Result<SwitchOutcome, ProjectError> {
        let (_, outcome) = self
            .store
            .try_update(|state| branches::switch(state, id, Utc::now()).map_err(ProjectError::from))?;
        self.audit(
            types::WORKSPACE_BRANCH,
            json!({"action": "switch", "branch_id": id, "from": outcome.switched_from}),
            Some(BRANCH_AGENT),
        );
        Ok(outcome)
    }

    pub fn merge_branch(&self, id: &str, memo: &str) -> Result<MergeOutcome, ProjectError> {
        let (_, outcome) = self
            .store
            .try_update(|state| branches::merge(state, id, memo, Utc::now()).map_err(ProjectError::from))?;
        self.audit(
            types::WORKSPACE_BRANCH,
            json!({
                "message": outcome.message,
                "action": "merge",
                "branch_id": id,
                "merged_into": outcome.merged_into,
                "memo": memo,
            }),
            Some(BRANCH_AGENT),
        );
        Ok(outcome)
    }

    pub fn abandon_branch(&self, id: &str, rationale: Option<&str>) -> Result<AbandonOutcome, ProjectError> {
        let (_, outcome) = self
            .store
            .try_update(|state| branches::abandon(state, id, rationale, Utc::now()).map_err(ProjectError::from))?;
        self.audit(
            types::WORKSPACE_BRANCH,
            json!({
                "message": outcome.message,
                "action": "abandon",
                "branch_id": id,
                "rationale": rationale.unwrap_or("No rationale provided"),
            }),
            Some(BRANCH_AGENT),
        );
        Ok(outcome)
    }

    pub fn list_branches(&self) -> Result<BranchList, ProjectError> {
        let state = self.store.load()?;
        Ok(branches::list(&state))
    }

    pub fn branch_status(&self) -> Result<BranchStatusReport, ProjectError> {
        let state = self.store.load()?;
        Ok(branches::status(&state))
    }

    fn team_audit(&self, message: String) {
        self.audit(types::TEAM_ACTIVITY, json!({"message": message}), Some(TEAM_AGENT));
    }

    pub fn set_primary_researcher(&self, name: &str, email: Option<&str>) -> Result<PrimaryResearcher, ProjectError> {
        let (_, primary) = self
            .store
            .update(|state| team::set_primary(state, name, email, Utc::now()))?;
        self.team_audit(format!(
            "Primary researcher set: {name} ({})",
            email.unwrap_or("no email provided")
        ));
        Ok(primary)
    }

    pub fn add_team_member(&self, name: &str, email: Option<&str>, role: Role) -> Result<MemberAdded, ProjectError> {
        let (_, added) = self.store.try_update(|state| {
            team::add_member(state, name, email, role, Utc::now()).map_err(ProjectError::from)
        })?;
        self.team_audit(format!("Team member added: {name} as {role}"));
        Ok(added)
    }

    /// Deactivate a member; attribution to them stays resolvable
    pub fn remove_team_member(&self, id: &str) -> Result<(), ProjectError> {
        self.store
            .try_update(|state| team::remove_member(state, id).map_err(ProjectError::from))?;
        self.team_audit(format!("Team member deactivated: {id}"));
        Ok(())
    }

    pub fn set_current_researcher(&self, id: &str) -> Result<CurrentResearcher, ProjectError> {
        let (_, current) = self
            .store
            .try_update(|state| team::set_current(state, id).map_err(ProjectError::from))?;
        Ok(current)
    }

    pub fn assign_documents(&self, id: &str, documents: &[String]) -> Result<Assignment, ProjectError> {
        let (_, assignment) = self
            .store
            .try_update(|state| team::assign_documents(state, id, documents).map_err(ProjectError::from))?;
        Ok(assignment)
    }

    pub fn start_icr(&self, participants: &[String], documents: &[String]) -> Result<SessionStarted, ProjectError> {
        let (_, started) = self.store.try_update(|state| {
            team::start_icr(state, participants, documents, Utc::now()).map_err(ProjectError::from)
        })?;
        self.team_audit(format!(
            "Intercoder reliability session {} started with {} on {}",
            started.session_id,
            started.participants.join(", "),
            started.documents.join(", ")
        ));
        Ok(started)
    }

    /// Returns the session's outcome count
    pub fn record_icr_outcome(
        &self,
        session_id: &str,
        outcome_type: OutcomeType,
        details: Option<&str>,
    ) -> Result<usize, ProjectError> {
        let (_, count) = self.store.try_update(|state| {
            team::record_icr_outcome(state, session_id, outcome_type, details).map_err(ProjectError::from)
        })?;
        Ok(count)
    }

    pub fn complete_icr(&self, session_id: &str, notes: Option<&str>) -> Result<SessionCompleted, ProjectError> {
        let (_, completed) = self
            .store
            .try_update(|state| team::complete_icr(state, session_id, notes).map_err(ProjectError::from))?;
        self.team_audit(format!(
            "ICR session {session_id} completed: {}",
            notes.unwrap_or("no notes")
        ));
        Ok(completed)
    }

    /// Attribute `action` on `target` to the current researcher
    pub fn log_attribution(&self, action: Action, target: &str, notes: Option<&str>) -> Result<Attribution, ProjectError> {
        let (_, attribution) = self
            .store
            .update(|state| team::log_attribution(state, action, target, notes, Utc::now()))?;
        Ok(attribution)
    }

    pub fn team_status(&self) -> Result<TeamStatus, ProjectError> {
        let state = self.store.load()?;
        Ok(team::status(&state))
    }

    pub fn list_team_members(&self) -> Result<Vec<MemberListing>, ProjectError> {
        let state = self.store.load()?;
        Ok(team::list_members(&state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::NativeLocker;
    use tempfile::TempDir;

    fn project(temp: &TempDir) -> Project {
        Project::with_locker(temp.path(), Config::default(), Arc::new(NativeLocker))
    }

    #[test]
    fn test_transition_is_logged() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);
        project.store().update(|s| s.documents_manually_coded = 10).unwrap();

        project.transition_stage(Stage::Stage2, Some("researcher")).unwrap();

        let logged = project.events().by_type(types::STAGE_TRANSITION).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].content, json!({"from": "stage1", "to": "stage2"}));
        assert_eq!(logged[0].agent, "researcher");
    }

    #[test]
    fn test_rejected_transition_not_logged() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);

        assert!(project.transition_stage(Stage::Stage2, None).is_err());
        assert!(project.events().by_type(types::STAGE_TRANSITION).unwrap().is_empty());
    }

    #[test]
    fn test_first_strain_logged_once() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);

        for _ in 0..4 {
            project.record_override("stream-separation", Some("theoretical sampling")).unwrap();
        }

        let strain = project.events().by_type(types::METHODOLOGICAL_STRAIN).unwrap();
        assert_eq!(strain.len(), 1);
        assert_eq!(strain[0].agent, STRAIN_AGENT);
        assert_eq!(strain[0].content["override_count"], json!(3));

        let report = project.check_strain(None).unwrap();
        assert!(report.has_strain);
        assert_eq!(report.rules[0].override_count, 4);
    }

    #[test]
    fn test_unknown_rule_leaves_document_untouched() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);
        let before = project.load().unwrap();

        let err = project.record_override("speaker-isolation", None).unwrap_err();
        assert!(matches!(err, ProjectError::Rule(crate::error::RuleError::UnknownRule(_))));
        assert_eq!(project.load().unwrap(), before);
    }

    #[test]
    fn test_saturation_through_store() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);
        assert!(project.saturation_status().unwrap().is_none());

        project.store().update(|s| s.documents_coded = 20).unwrap();
        project.record_document("INT_001", Some("Interview 1"), 5).unwrap();
        project.record_refinement("coping", "split", None, None, Some("two mechanisms")).unwrap();
        let mut coverage = BTreeMap::new();
        coverage.insert(
            "resilience".to_string(),
            CoverageInput {
                document_count: 16,
                case_count: 3,
            },
        );
        let cov = project.update_coverage(&coverage).unwrap();
        assert_eq!(cov.universal_codes, 0);
        project.update_redundancy(0.4, Some("new variations")).unwrap();

        let assessment = project.assess_saturation().unwrap();
        assert_eq!(assessment.metrics.documents_coded, 1);

        let status = project.saturation_status().unwrap().unwrap();
        assert_eq!(status.refinement.splits_merges, 1);
        assert_eq!(status.saturation.overall_level, assessment.saturation_level);
        assert_eq!(project.events().by_type(types::SATURATION_ASSESSED).unwrap().len(), 1);
    }

    #[test]
    fn test_rule_toggle_persists() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);

        project.set_rule_enabled("stream-separation", false).unwrap();
        assert!(project.check_rules().unwrap().find("stream-separation").is_none());
        assert_eq!(project.events().by_type(types::RULE_TOGGLED).unwrap().len(), 1);
    }

    #[test]
    fn test_every_fifth_document_pauses_once_per_cooldown() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);

        for n in 1..=4 {
            let outcome = project.code_document(true).unwrap();
            assert_eq!(outcome.documents_coded, n);
            assert!(outcome.friction.is_none());
        }
        let fifth = project.code_document(true).unwrap();
        assert_eq!(fifth.documents_manually_coded, 5);
        let check = fifth.friction.unwrap();
        assert_eq!(check.trigger, FrictionTrigger::PostFiveDocuments);
        assert!(check.message.unwrap().contains("You've coded 5 documents"));

        for _ in 0..5 {
            assert!(project.code_document(false).unwrap().friction.is_none());
        }
        assert_eq!(project.load().unwrap().documents_coded, 10);
        assert_eq!(project.friction_summary().unwrap().total_events, 1);
    }

    #[test]
    fn test_refused_stage2_fires_hard_stop() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);

        let err = project.transition_stage(Stage::Stage2, None).unwrap_err();
        assert!(matches!(err, ProjectError::Store(StoreError::PreconditionNotMet { .. })));

        let log = project.friction().read_all().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].trigger, "pre_stage2");

        let err = project.record_friction_bypass(FrictionTrigger::PreStage2, Some("in a hurry")).unwrap_err();
        assert!(matches!(
            err,
            ProjectError::Friction(FrictionError::NotBypassable(FrictionTrigger::PreStage2))
        ));
        assert_eq!(project.load().unwrap().current_stage, Stage::Stage1);
    }

    #[test]
    fn test_bypass_reaches_audit_trail() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);

        let record = project
            .record_friction_bypass(FrictionTrigger::SessionEnd, Some("late meeting"))
            .unwrap();
        assert!(record.is_bypass());

        let audited = project.events().by_type(types::FRICTION_BYPASSED).unwrap();
        assert_eq!(audited.len(), 1);
        assert_eq!(audited[0].content["trigger"], json!("session_end"));
        assert_eq!(project.friction_summary().unwrap().by_level["bypassed"], 1);
    }

    #[test]
    fn test_branch_fork_and_merge_persist() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);

        let fork = project
            .fork_branch("power lens", Some(BranchFraming::AlternativeInterpretation), Some("read through power"))
            .unwrap();
        assert_eq!(fork.forked_from, "main");
        assert_eq!(project.branch_status().unwrap().current_branch, fork.branch_id);

        let before = project.load().unwrap();
        let err = project.merge_branch(&fork.branch_id, "too short").unwrap_err();
        assert!(matches!(err, ProjectError::Branch(crate::error::BranchError::MemoTooShort { .. })));
        assert_eq!(project.load().unwrap(), before);

        let memo = "Power reading explains the avoidance codes better than the coping frame did.";
        let merged = project.merge_branch(&fork.branch_id, memo).unwrap();
        assert_eq!(merged.current_branch, "main");

        let list = project.list_branches().unwrap();
        assert_eq!((list.active_count, list.merged_count), (1, 1));
        let audited = project.events().by_type(types::WORKSPACE_BRANCH).unwrap();
        let actions: Vec<_> = audited.iter().map(|e| e.content["action"].clone()).collect();
        assert_eq!(actions, vec![json!("fork"), json!("merge")]);
        assert_eq!(audited[0].agent, BRANCH_AGENT);
    }

    #[test]
    fn test_team_changes_are_audited() {
        let temp = TempDir::new().unwrap();
        let project = project(&temp);

        project.set_primary_researcher("Ana Ruiz", None).unwrap();
        let added = project.add_team_member("Ben Ode", Some("ben@example.org"), Role::Coder).unwrap();
        assert_eq!(added.total_members, 2);

        let current = project.set_current_researcher(&added.member.id).unwrap();
        assert_eq!(current.name, "Ben Ode");
        let attribution = project.log_attribution(Action::CodedDocument, "INT_004", None).unwrap();
        assert_eq!(attribution.researcher_id, added.member.id);

        let participants = vec!["primary".to_string(), added.member.id.clone()];
        let started = project.start_icr(&participants, &["INT_004".to_string()]).unwrap();
        assert_eq!(
            project
                .record_icr_outcome(&started.session_id, OutcomeType::DefinitionRefined, None)
                .unwrap(),
            1
        );
        let completed = project.complete_icr(&started.session_id, Some("aligned")).unwrap();
        assert_eq!(completed.documents_resolved, 1);

        let status = project.team_status().unwrap();
        assert!(status.icr_enabled);
        assert_eq!(status.pending_icr_docs, 0);
        assert_eq!(status.attribution_count, 1);
        assert_eq!(project.events().by_type(types::TEAM_ACTIVITY).unwrap().len(), 4);
    }
}
