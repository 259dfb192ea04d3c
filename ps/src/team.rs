//! Researcher team, attribution and intercoder reliability
//!
//! A project starts in single-researcher mode. Once a team is configured,
//! every attributed action names the researcher who was current at the
//! time. Members are never removed, only deactivated, so attribution stays
//! resolvable. Intercoder reliability (ICR) sessions track documents coded
//! independently by several researchers until a comparison resolves them.
//!
//! Stored under the top-level `researcher_team` key.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::ProjectState;
use crate::error::TeamError;

/// Researcher id that always refers to the primary researcher
pub const PRIMARY: &str = "primary";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Lead,
    CoInvestigator,
    #[default]
    Coder,
    Auditor,
    Consultant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::CoInvestigator => "co_investigator",
            Self::Coder => "coder",
            Self::Auditor => "auditor",
            Self::Consultant => "consultant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(Self::Lead),
            "co_investigator" => Ok(Self::CoInvestigator),
            "coder" => Ok(Self::Coder),
            "auditor" => Ok(Self::Auditor),
            "consultant" => Ok(Self::Consultant),
            other => Err(TeamError::InvalidRole(other.to_string())),
        }
    }
}

/// Analytical actions that can be attributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CodedDocument,
    CreatedCode,
    RefinedCode,
    WroteMemo,
    MadeDecision,
}

impl FromStr for Action {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coded_document" => Ok(Self::CodedDocument),
            "created_code" => Ok(Self::CreatedCode),
            "refined_code" => Ok(Self::RefinedCode),
            "wrote_memo" => Ok(Self::WroteMemo),
            "made_decision" => Ok(Self::MadeDecision),
            other => Err(TeamError::InvalidAction(other.to_string())),
        }
    }
}

/// What came out of comparing independently coded documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    CodeMerged,
    CodeSplit,
    DefinitionRefined,
    DisagreementNoted,
}

impl FromStr for OutcomeType {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code_merged" => Ok(Self::CodeMerged),
            "code_split" => Ok(Self::CodeSplit),
            "definition_refined" => Ok(Self::DefinitionRefined),
            "disagreement_noted" => Ok(Self::DisagreementNoted),
            other => Err(TeamError::InvalidOutcome(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    #[default]
    Pending,
    Resolved,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryResearcher {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub id: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub name: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub email: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub role: Role,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize_opt")]
    pub joined_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamMember {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub id: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub name: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub email: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub role: Role,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize_opt")]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub status: MemberStatus,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub coding_assignments: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TeamMember {
    fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlapDocument {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub document_id: String,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub coded_by: Vec<String>,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub comparison_status: ComparisonStatus,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub agreement_notes: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    #[serde(rename = "type")]
    pub outcome_type: OutcomeType,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub details: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilitySession {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub session_id: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub date: Option<NaiveDate>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub participants: Vec<String>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub documents_compared: Vec<String>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub codes_discussed: Vec<Value>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub outcomes: Vec<SessionOutcome>,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub notes: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntercoderReliability {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub enabled: bool,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub overlap_documents: Vec<OverlapDocument>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub reliability_sessions: Vec<ReliabilitySession>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub researcher_id: String,
    pub action: Action,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub target_id: String,
    #[serde(default, deserialize_with = "crate::domain::timestamp::deserialize_opt")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub notes: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Team section stored under `researcher_team`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearcherTeam {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub primary_researcher: Option<PrimaryResearcher>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub team_members: Vec<TeamMember>,
    /// `primary` or a member id
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub current_researcher: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub intercoder_reliability: IntercoderReliability,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub attribution_log: Vec<Attribution>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ResearcherTeam {
    fn default() -> Self {
        Self {
            primary_researcher: None,
            team_members: Vec::new(),
            current_researcher: PRIMARY.to_string(),
            intercoder_reliability: IntercoderReliability::default(),
            attribution_log: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl ResearcherTeam {
    fn member_mut(&mut self, id: &str) -> Result<&mut TeamMember, TeamError> {
        self.team_members
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| TeamError::MemberNotFound(id.to_string()))
    }

    fn session_mut(&mut self, id: &str) -> Result<&mut ReliabilitySession, TeamError> {
        self.intercoder_reliability
            .reliability_sessions
            .iter_mut()
            .find(|s| s.session_id == id)
            .ok_or_else(|| TeamError::SessionNotFound(id.to_string()))
    }

    /// Display name for a researcher id
    fn name_of(&self, id: &str) -> String {
        if id == PRIMARY {
            return self
                .primary_researcher
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "Primary Researcher".to_string());
        }
        self.team_members
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn active_members(&self) -> impl Iterator<Item = &TeamMember> {
        self.team_members.iter().filter(|m| m.is_active())
    }
}

/// URL-safe id from a display name: `"Dr. Jane Smith"` -> `"dr-jane-smith"`
pub fn generate_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c);
        } else if !id.ends_with('-') {
            id.push('-');
        }
    }
    id.trim_matches('-').to_string()
}

/// Split a comma-separated id list, dropping empty entries
pub fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberAdded {
    pub member: TeamMember,
    /// Every member on record plus the primary researcher, if set
    pub total_members: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentResearcher {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub researcher: String,
    pub assigned: Vec<String>,
    pub total_assignments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStarted {
    pub session_id: String,
    pub participants: Vec<String>,
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionCompleted {
    pub session_id: String,
    pub outcomes_count: usize,
    pub documents_resolved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSummary {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub assignments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamStatus {
    /// False in single-researcher mode
    pub initialized: bool,
    pub primary_researcher: Option<String>,
    pub current_researcher: CurrentResearcher,
    /// Active members plus the primary researcher, if set
    pub team_size: usize,
    pub active_members: Vec<MemberSummary>,
    pub icr_enabled: bool,
    pub pending_icr_docs: usize,
    pub attribution_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberListing {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: MemberStatus,
    pub is_current: bool,
}

pub fn set_primary(state: &mut ProjectState, name: &str, email: Option<&str>, now: DateTime<Utc>) -> PrimaryResearcher {
    debug!(%name, "team::set_primary: called");
    let primary = PrimaryResearcher {
        id: PRIMARY.to_string(),
        name: name.to_string(),
        email: email.unwrap_or_default().to_string(),
        role: Role::Lead,
        joined_at: Some(now),
        extra: Map::new(),
    };
    state.team_mut().primary_researcher = Some(primary.clone());
    primary
}

pub fn add_member(
    state: &mut ProjectState,
    name: &str,
    email: Option<&str>,
    role: Role,
    now: DateTime<Utc>,
) -> Result<MemberAdded, TeamError> {
    debug!(%name, %role, "team::add_member: called");
    let id = generate_id(name);
    if id.is_empty() || id == PRIMARY {
        return Err(TeamError::InvalidName(name.to_string()));
    }
    let team = state.team_mut();
    if team.team_members.iter().any(|m| m.id == id) {
        return Err(TeamError::DuplicateMember(id));
    }

    let member = TeamMember {
        id,
        name: name.to_string(),
        email: email.unwrap_or_default().to_string(),
        role,
        joined_at: Some(now),
        status: MemberStatus::Active,
        coding_assignments: Vec::new(),
        extra: Map::new(),
    };
    team.team_members.push(member.clone());
    info!(member_id = %member.id, %role, "Added team member");

    Ok(MemberAdded {
        member,
        total_members: team.team_members.len() + usize::from(team.primary_researcher.is_some()),
    })
}

/// Deactivate a member; the record stays for attribution
pub fn remove_member(state: &mut ProjectState, id: &str) -> Result<(), TeamError> {
    debug!(%id, "team::remove_member: called");
    let team = state.team_mut();
    team.member_mut(id)?.status = MemberStatus::Inactive;
    if team.current_researcher == id {
        team.current_researcher = PRIMARY.to_string();
    }
    Ok(())
}

/// Attribute subsequent actions to `id` (`primary` or an active member)
pub fn set_current(state: &mut ProjectState, id: &str) -> Result<CurrentResearcher, TeamError> {
    debug!(%id, "team::set_current: called");
    let team = state.team_mut();
    if id != PRIMARY && !team.active_members().any(|m| m.id == id) {
        return Err(TeamError::InactiveMember(id.to_string()));
    }
    team.current_researcher = id.to_string();
    Ok(CurrentResearcher {
        id: id.to_string(),
        name: team.name_of(id),
    })
}

pub fn assign_documents(state: &mut ProjectState, id: &str, documents: &[String]) -> Result<Assignment, TeamError> {
    debug!(%id, count = documents.len(), "team::assign_documents: called");
    let member = state.team_mut().member_mut(id)?;
    for doc in documents {
        if !member.coding_assignments.contains(doc) {
            member.coding_assignments.push(doc.clone());
        }
    }
    Ok(Assignment {
        researcher: id.to_string(),
        assigned: documents.to_vec(),
        total_assignments: member.coding_assignments.len(),
    })
}

/// Open an ICR session over `documents`, marking each one pending
pub fn start_icr(
    state: &mut ProjectState,
    participants: &[String],
    documents: &[String],
    now: DateTime<Utc>,
) -> Result<SessionStarted, TeamError> {
    debug!(?participants, ?documents, "team::start_icr: called");
    if participants.is_empty() || documents.is_empty() {
        return Err(TeamError::EmptySession);
    }
    let icr = &mut state.team_mut().intercoder_reliability;
    icr.enabled = true;

    let mut session_id = format!("icr-{:x}", now.timestamp_millis().max(0));
    let mut n = 2;
    while icr.reliability_sessions.iter().any(|s| s.session_id == session_id) {
        session_id = format!("icr-{:x}-{n}", now.timestamp_millis().max(0));
        n += 1;
    }

    for doc in documents {
        match icr.overlap_documents.iter_mut().find(|o| &o.document_id == doc) {
            Some(existing) => {
                for p in participants {
                    if !existing.coded_by.contains(p) {
                        existing.coded_by.push(p.clone());
                    }
                }
                existing.comparison_status = ComparisonStatus::Pending;
            }
            None => icr.overlap_documents.push(OverlapDocument {
                document_id: doc.clone(),
                coded_by: participants.to_vec(),
                ..Default::default()
            }),
        }
    }

    icr.reliability_sessions.push(ReliabilitySession {
        session_id: session_id.clone(),
        date: Some(now.date_naive()),
        participants: participants.to_vec(),
        documents_compared: documents.to_vec(),
        ..Default::default()
    });
    info!(%session_id, documents = documents.len(), "Started ICR session");

    Ok(SessionStarted {
        session_id,
        participants: participants.to_vec(),
        documents: documents.to_vec(),
    })
}

/// Append an outcome to a session; returns the session's outcome count
pub fn record_icr_outcome(
    state: &mut ProjectState,
    session_id: &str,
    outcome_type: OutcomeType,
    details: Option<&str>,
) -> Result<usize, TeamError> {
    debug!(%session_id, ?outcome_type, "team::record_icr_outcome: called");
    let session = state.team_mut().session_mut(session_id)?;
    session.outcomes.push(SessionOutcome {
        outcome_type,
        details: details.unwrap_or_default().to_string(),
        extra: Map::new(),
    });
    Ok(session.outcomes.len())
}

/// Close a session and mark its documents resolved with `notes`
pub fn complete_icr(state: &mut ProjectState, session_id: &str, notes: Option<&str>) -> Result<SessionCompleted, TeamError> {
    debug!(%session_id, "team::complete_icr: called");
    let notes = notes.unwrap_or_default().to_string();
    let team = state.team_mut();
    let session = team.session_mut(session_id)?;
    session.notes = notes.clone();
    let compared = session.documents_compared.clone();
    let outcomes_count = session.outcomes.len();

    for doc in team
        .intercoder_reliability
        .overlap_documents
        .iter_mut()
        .filter(|d| compared.contains(&d.document_id))
    {
        doc.comparison_status = ComparisonStatus::Resolved;
        doc.agreement_notes = notes.clone();
    }

    Ok(SessionCompleted {
        session_id: session_id.to_string(),
        outcomes_count,
        documents_resolved: compared.len(),
    })
}

/// Record `action` on `target` by the current researcher
pub fn log_attribution(
    state: &mut ProjectState,
    action: Action,
    target: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Attribution {
    debug!(?action, %target, "team::log_attribution: called");
    let team = state.team_mut();
    let attribution = Attribution {
        researcher_id: team.current_researcher.clone(),
        action,
        target_id: target.to_string(),
        timestamp: Some(now),
        notes: notes.unwrap_or_default().to_string(),
        extra: Map::new(),
    };
    team.attribution_log.push(attribution.clone());
    attribution
}

pub fn status(state: &ProjectState) -> TeamStatus {
    let Some(team) = state.researcher_team.as_ref() else {
        return TeamStatus {
            initialized: false,
            primary_researcher: None,
            current_researcher: CurrentResearcher {
                id: PRIMARY.to_string(),
                name: "Primary".to_string(),
            },
            team_size: 1,
            active_members: Vec::new(),
            icr_enabled: false,
            pending_icr_docs: 0,
            attribution_count: 0,
        };
    };

    let active_members: Vec<MemberSummary> = team
        .active_members()
        .map(|m| MemberSummary {
            id: m.id.clone(),
            name: m.name.clone(),
            role: m.role,
            assignments: m.coding_assignments.len(),
        })
        .collect();

    TeamStatus {
        initialized: true,
        primary_researcher: team.primary_researcher.as_ref().map(|p| p.name.clone()),
        current_researcher: CurrentResearcher {
            id: team.current_researcher.clone(),
            name: team.name_of(&team.current_researcher),
        },
        team_size: active_members.len() + usize::from(team.primary_researcher.is_some()),
        active_members,
        icr_enabled: team.intercoder_reliability.enabled,
        pending_icr_docs: team
            .intercoder_reliability
            .overlap_documents
            .iter()
            .filter(|d| d.comparison_status == ComparisonStatus::Pending)
            .count(),
        attribution_count: team.attribution_log.len(),
    }
}

/// Primary researcher first, then every member, active or not
pub fn list_members(state: &ProjectState) -> Vec<MemberListing> {
    let Some(team) = state.researcher_team.as_ref() else {
        return Vec::new();
    };

    let primary = team.primary_researcher.iter().map(|p| MemberListing {
        id: p.id.clone(),
        name: p.name.clone(),
        email: p.email.clone(),
        role: p.role,
        status: MemberStatus::Active,
        is_current: team.current_researcher == PRIMARY,
    });
    let members = team.team_members.iter().map(|m| MemberListing {
        id: m.id.clone(),
        name: m.name.clone(),
        email: m.email.clone(),
        role: m.role,
        status: m.status,
        is_current: team.current_researcher == m.id,
    });
    primary.chain(members).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 6, 14, 0, 0).unwrap()
    }

    fn ids(raw: &str) -> Vec<String> {
        split_ids(raw)
    }

    fn team_of_two() -> ProjectState {
        let mut state = ProjectState::default();
        set_primary(&mut state, "Dr. Jane Smith", Some("jane@university.edu"), now());
        add_member(&mut state, "John Doe", None, Role::Coder, now()).unwrap();
        add_member(&mut state, "Alice Johnson", None, Role::Auditor, now()).unwrap();
        state
    }

    #[test]
    fn test_generate_id() {
        assert_eq!(generate_id("Dr. Jane  Smith"), "dr-jane-smith");
        assert_eq!(generate_id("  --O'Brien--  "), "o-brien");
        assert_eq!(generate_id("???"), "");
    }

    #[test]
    fn test_add_member_rejects_duplicates_and_bad_names() {
        let mut state = team_of_two();
        let err = add_member(&mut state, "john doe", None, Role::Coder, now()).unwrap_err();
        assert_eq!(err, TeamError::DuplicateMember("john-doe".to_string()));
        assert!(matches!(
            add_member(&mut state, "!!", None, Role::Coder, now()),
            Err(TeamError::InvalidName(_))
        ));
        assert_eq!("reviewer".parse::<Role>(), Err(TeamError::InvalidRole("reviewer".to_string())));
    }

    #[test]
    fn test_removed_member_stays_on_record() {
        let mut state = team_of_two();
        set_current(&mut state, "john-doe").unwrap();
        remove_member(&mut state, "john-doe").unwrap();

        let team = state.researcher_team.as_ref().unwrap();
        assert_eq!(team.current_researcher, PRIMARY);
        assert_eq!(team.team_members.len(), 2);
        assert_eq!(team.team_members[0].status, MemberStatus::Inactive);

        assert_eq!(
            set_current(&mut state, "john-doe").unwrap_err(),
            TeamError::InactiveMember("john-doe".to_string())
        );
        let listing = list_members(&state);
        assert_eq!(listing.len(), 3);
        assert!(listing[0].is_current);
    }

    #[test]
    fn test_attribution_follows_current_researcher() {
        let mut state = team_of_two();
        log_attribution(&mut state, Action::CodedDocument, "INT_001", None, now());
        let current = set_current(&mut state, "alice-johnson").unwrap();
        assert_eq!(current.name, "Alice Johnson");
        log_attribution(&mut state, Action::WroteMemo, "memo-3", Some("coping memo"), now());

        let log = &state.researcher_team.as_ref().unwrap().attribution_log;
        assert_eq!(log[0].researcher_id, PRIMARY);
        assert_eq!(log[1].researcher_id, "alice-johnson");
        assert_eq!(log[1].action, Action::WroteMemo);
    }

    #[test]
    fn test_assignments_deduplicated() {
        let mut state = team_of_two();
        assign_documents(&mut state, "john-doe", &ids("INT_001, INT_002")).unwrap();
        let second = assign_documents(&mut state, "john-doe", &ids("INT_002,INT_003,")).unwrap();
        assert_eq!(second.assigned, vec!["INT_002", "INT_003"]);
        assert_eq!(second.total_assignments, 3);
        assert!(assign_documents(&mut state, "nobody", &ids("X")).is_err());
    }

    #[test]
    fn test_icr_session_lifecycle() {
        let mut state = team_of_two();
        let started = start_icr(&mut state, &ids("john-doe,alice-johnson"), &ids("INT_005,INT_006"), now()).unwrap();
        assert_eq!(started.session_id, format!("icr-{:x}", now().timestamp_millis()));
        assert_eq!(status(&state).pending_icr_docs, 2);

        let count = record_icr_outcome(
            &mut state,
            &started.session_id,
            OutcomeType::DefinitionRefined,
            Some("Clarified boundary between coping and adapting"),
        )
        .unwrap();
        assert_eq!(count, 1);
        assert!(record_icr_outcome(&mut state, "icr-0", OutcomeType::CodeSplit, None).is_err());

        let done = complete_icr(&mut state, &started.session_id, Some("95% agreement")).unwrap();
        assert_eq!(done.documents_resolved, 2);
        assert_eq!(done.outcomes_count, 1);

        let report = status(&state);
        assert!(report.icr_enabled);
        assert_eq!(report.pending_icr_docs, 0);
        let icr = &state.researcher_team.as_ref().unwrap().intercoder_reliability;
        assert_eq!(icr.overlap_documents[0].agreement_notes, "95% agreement");

        // A second session on the same document reopens it
        let again = start_icr(&mut state, &ids("john-doe,primary"), &ids("INT_005"), now()).unwrap();
        assert_ne!(again.session_id, started.session_id);
        let icr = &state.researcher_team.as_ref().unwrap().intercoder_reliability;
        assert_eq!(icr.overlap_documents[0].coded_by, vec!["john-doe", "alice-johnson", "primary"]);
        assert_eq!(status(&state).pending_icr_docs, 1);
    }

    #[test]
    fn test_status_single_researcher_mode() {
        let state = ProjectState::default();
        let report = status(&state);
        assert!(!report.initialized);
        assert_eq!(report.current_researcher.id, PRIMARY);
        assert!(list_members(&state).is_empty());

        let report = status(&team_of_two());
        assert_eq!(report.team_size, 3);
        assert_eq!(report.primary_researcher.as_deref(), Some("Dr. Jane Smith"));
    }
}
