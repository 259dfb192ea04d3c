//! Workspace branches
//!
//! Interpretive work is not linear. A branch is a named line of analysis
//! forked from the current one with a methodological framing; it ends by
//! being merged back (with a synthesis memo) or abandoned (with a reason).
//! Nothing is ever deleted: merged and abandoned branches, and every
//! decision that touched them, stay in the document as audit trail.
//!
//! Stored under the top-level `workspace_branches` key.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::ProjectState;
use crate::error::BranchError;

pub const MAIN_BRANCH: &str = "main";
const MAIN_BRANCH_NAME: &str = "Main Analysis";
/// Shortest synthesis memo a merge accepts, after trimming
pub const MIN_MERGE_MEMO: usize = 50;
const ID_NAME_CHARS: usize = 20;
const RECENT_DECISIONS: usize = 5;

/// Why a branch exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchFraming {
    #[default]
    Exploratory,
    Confirmatory,
    NegativeCase,
    AlternativeInterpretation,
}

impl BranchFraming {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploratory => "exploratory",
            Self::Confirmatory => "confirmatory",
            Self::NegativeCase => "negative_case",
            Self::AlternativeInterpretation => "alternative_interpretation",
        }
    }
}

impl fmt::Display for BranchFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BranchFraming {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exploratory" => Ok(Self::Exploratory),
            "confirmatory" => Ok(Self::Confirmatory),
            "negative_case" => Ok(Self::NegativeCase),
            "alternative_interpretation" => Ok(Self::AlternativeInterpretation),
            other => Err(BranchError::InvalidFraming(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    #[default]
    Active,
    Merged,
    Abandoned,
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Merged => "merged",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchAction {
    Fork,
    Switch,
    Merge,
    Abandon,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Branch {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub id: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub name: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub parent_branch: Option<String>,
    /// Last `data_structure` version at fork time, or the fork date
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub forked_at_version: String,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    /// `None` only for the main branch
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub methodological_framing: Option<BranchFraming>,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub status: BranchStatus,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub merge_memo: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Branch {
    fn main(now: Option<DateTime<Utc>>) -> Self {
        Self {
            id: MAIN_BRANCH.to_string(),
            name: MAIN_BRANCH_NAME.to_string(),
            parent_branch: None,
            forked_at_version: "initial".to_string(),
            created_at: now,
            methodological_framing: None,
            status: BranchStatus::Active,
            merge_memo: None,
            extra: Map::new(),
        }
    }

    /// Branch that merge and abandon fall back to
    fn parent_or_main(&self) -> String {
        self.parent_branch.clone().unwrap_or_else(|| MAIN_BRANCH.to_string())
    }
}

/// One entry in `workspace_branches.branch_decisions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDecision {
    pub action: BranchAction,
    pub branch_id: String,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub target_branch: Option<String>,
    #[serde(default, deserialize_with = "crate::domain::timestamp::deserialize_opt")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub rationale: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Branch section stored under `workspace_branches`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceBranches {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub current_branch: String,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub branches: Vec<Branch>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub branch_decisions: Vec<BranchDecision>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for WorkspaceBranches {
    fn default() -> Self {
        Self {
            current_branch: MAIN_BRANCH.to_string(),
            branches: vec![Branch::main(None)],
            branch_decisions: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl WorkspaceBranches {
    /// Fresh section holding only the main branch, created `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            branches: vec![Branch::main(Some(now))],
            ..Default::default()
        }
    }

    pub fn find(&self, id: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    /// Active branch `id`, or why it cannot be used
    fn active_mut(&mut self, id: &str) -> Result<&mut Branch, BranchError> {
        let branch = self
            .branches
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| BranchError::NotFound(id.to_string()))?;
        if branch.status != BranchStatus::Active {
            return Err(BranchError::Inactive {
                id: id.to_string(),
                status: branch.status,
            });
        }
        Ok(branch)
    }

    fn decide(&mut self, action: BranchAction, branch_id: &str, target: Option<String>, rationale: String, now: DateTime<Utc>) {
        self.branch_decisions.push(BranchDecision {
            action,
            branch_id: branch_id.to_string(),
            target_branch: target,
            timestamp: Some(now),
            rationale,
            extra: Map::new(),
        });
    }

    fn count(&self, status: BranchStatus) -> usize {
        self.branches.iter().filter(|b| b.status == status).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForkOutcome {
    pub branch_id: String,
    pub name: String,
    pub forked_from: String,
    pub forked_at_version: String,
    pub framing: BranchFraming,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchOutcome {
    pub switched_to: String,
    pub switched_from: String,
    pub branch_name: String,
    pub framing: Option<BranchFraming>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub merged_branch: String,
    pub merged_into: String,
    pub current_branch: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbandonOutcome {
    pub abandoned_branch: String,
    pub current_branch: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchSummary {
    pub id: String,
    pub name: String,
    pub status: BranchStatus,
    pub framing: Option<BranchFraming>,
    pub parent: Option<String>,
    pub forked_at: String,
    pub created: Option<NaiveDate>,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchList {
    pub current_branch: String,
    pub branches: Vec<BranchSummary>,
    pub active_count: usize,
    pub merged_count: usize,
    pub abandoned_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentDecision {
    pub action: BranchAction,
    pub branch: String,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchStatusReport {
    /// False until the first branch operation writes the section
    pub initialized: bool,
    pub current_branch: String,
    pub current_branch_name: Option<String>,
    pub current_framing: Option<BranchFraming>,
    pub total_branches: usize,
    pub active_branches: usize,
    pub recent_activity: Vec<RecentDecision>,
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// `<name, lowercased, non-alphanumerics as '-', 20 chars>-<base36 millis>`
fn branch_id(name: &str, now: DateTime<Utc>, branches: &WorkspaceBranches) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .take(ID_NAME_CHARS)
        .collect();
    let base = format!("{sanitized}-{}", base36(now.timestamp_millis().max(0) as u64));

    let mut id = base.clone();
    let mut n = 2;
    while branches.find(&id).is_some() {
        id = format!("{base}-{n}");
        n += 1;
    }
    id
}

/// Last entry of `data_structure.version_history`, else the date of `now`
fn current_version(state: &ProjectState, now: DateTime<Utc>) -> String {
    let version = state
        .extra
        .get("data_structure")
        .and_then(|d| d.get("version_history"))
        .and_then(Value::as_array)
        .and_then(|history| history.last())
        .and_then(|last| last.get("version"));
    match version {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => now.date_naive().to_string(),
    }
}

/// Fork a branch off the current one and switch to it
pub fn fork(
    state: &mut ProjectState,
    name: &str,
    framing: Option<BranchFraming>,
    rationale: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ForkOutcome, BranchError> {
    debug!(%name, ?framing, "branches::fork: called");
    let name = name.trim();
    if name.is_empty() {
        return Err(BranchError::EmptyName);
    }
    let forked_at_version = current_version(state, now);
    let framing = framing.unwrap_or_default();
    let branches = state.branches_mut(now);
    let id = branch_id(name, now, branches);
    let previous = branches.current_branch.clone();

    branches.branches.push(Branch {
        id: id.clone(),
        name: name.to_string(),
        parent_branch: Some(previous.clone()),
        forked_at_version: forked_at_version.clone(),
        created_at: Some(now),
        methodological_framing: Some(framing),
        status: BranchStatus::Active,
        merge_memo: None,
        extra: Map::new(),
    });
    branches.decide(
        BranchAction::Fork,
        &id,
        Some(previous.clone()),
        rationale.unwrap_or_default().to_string(),
        now,
    );
    branches.current_branch = id.clone();
    branches.decide(
        BranchAction::Switch,
        &id,
        Some(previous.clone()),
        "Auto-switch after fork".to_string(),
        now,
    );
    info!(branch_id = %id, from = %previous, %framing, "Forked workspace branch");

    Ok(ForkOutcome {
        message: format!("Created and switched to branch \"{name}\". You can now explore this interpretive direction safely."),
        branch_id: id,
        name: name.to_string(),
        forked_from: previous,
        forked_at_version,
        framing,
    })
}

/// Make `id` the current branch; it must exist and be active
pub fn switch(state: &mut ProjectState, id: &str, now: DateTime<Utc>) -> Result<SwitchOutcome, BranchError> {
    debug!(%id, "branches::switch: called");
    let branches = state.branches_mut(now);
    let branch = branches.active_mut(id)?;
    let branch_name = branch.name.clone();
    let framing = branch.methodological_framing;

    let previous = std::mem::replace(&mut branches.current_branch, id.to_string());
    branches.decide(BranchAction::Switch, id, Some(previous.clone()), String::new(), now);

    Ok(SwitchOutcome {
        switched_to: id.to_string(),
        switched_from: previous,
        branch_name,
        framing,
    })
}

/// Merge `id` into its parent, recording the synthesis memo
///
/// Checks run in order: memo length, existence, active status, not main.
pub fn merge(state: &mut ProjectState, id: &str, memo: &str, now: DateTime<Utc>) -> Result<MergeOutcome, BranchError> {
    debug!(%id, memo_len = memo.len(), "branches::merge: called");
    let trimmed = memo.trim().chars().count();
    if trimmed < MIN_MERGE_MEMO {
        return Err(BranchError::MemoTooShort {
            min: MIN_MERGE_MEMO,
            len: trimmed,
        });
    }

    let branches = state.branches_mut(now);
    let branch = branches.active_mut(id)?;
    if branch.id == MAIN_BRANCH {
        return Err(BranchError::MainBranch("merge"));
    }
    branch.status = BranchStatus::Merged;
    branch.merge_memo = Some(memo.to_string());
    let target = branch.parent_or_main();
    let name = branch.name.clone();

    branches.decide(BranchAction::Merge, id, Some(target.clone()), memo.to_string(), now);
    if branches.current_branch == id {
        branches.current_branch = target.clone();
    }
    info!(branch_id = %id, into = %target, "Merged workspace branch");

    Ok(MergeOutcome {
        merged_branch: id.to_string(),
        merged_into: target,
        current_branch: branches.current_branch.clone(),
        message: format!("Branch \"{name}\" merged. Your synthesis memo has been recorded for the audit trail."),
    })
}

/// Close `id` without merging; the branch stays on record
pub fn abandon(
    state: &mut ProjectState,
    id: &str,
    rationale: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AbandonOutcome, BranchError> {
    debug!(%id, "branches::abandon: called");
    let branches = state.branches_mut(now);
    let branch = branches.active_mut(id)?;
    if branch.id == MAIN_BRANCH {
        return Err(BranchError::MainBranch("abandon"));
    }
    branch.status = BranchStatus::Abandoned;
    let parent = branch.parent_or_main();
    let name = branch.name.clone();

    let rationale = rationale
        .filter(|r| !r.trim().is_empty())
        .unwrap_or("No rationale provided");
    branches.decide(BranchAction::Abandon, id, None, rationale.to_string(), now);
    if branches.current_branch == id {
        branches.current_branch = parent;
    }
    info!(branch_id = %id, "Abandoned workspace branch");

    Ok(AbandonOutcome {
        abandoned_branch: id.to_string(),
        current_branch: branches.current_branch.clone(),
        message: format!(
            "Branch \"{name}\" abandoned. Abandoned branches are preserved in the audit trail: interpretive dead ends are data too."
        ),
    })
}

/// Every branch with counts per status
pub fn list(state: &ProjectState) -> BranchList {
    let fresh;
    let branches = match state.workspace_branches.as_ref() {
        Some(b) => b,
        None => {
            fresh = WorkspaceBranches::default();
            &fresh
        }
    };

    BranchList {
        current_branch: branches.current_branch.clone(),
        branches: branches
            .branches
            .iter()
            .map(|b| BranchSummary {
                id: b.id.clone(),
                name: b.name.clone(),
                status: b.status,
                framing: b.methodological_framing,
                parent: b.parent_branch.clone(),
                forked_at: b.forked_at_version.clone(),
                created: b.created_at.map(|t| t.date_naive()),
                is_current: b.id == branches.current_branch,
            })
            .collect(),
        active_count: branches.count(BranchStatus::Active),
        merged_count: branches.count(BranchStatus::Merged),
        abandoned_count: branches.count(BranchStatus::Abandoned),
    }
}

/// Current branch and the last few decisions
pub fn status(state: &ProjectState) -> BranchStatusReport {
    let Some(branches) = state.workspace_branches.as_ref() else {
        return BranchStatusReport {
            initialized: false,
            current_branch: MAIN_BRANCH.to_string(),
            current_branch_name: None,
            current_framing: None,
            total_branches: 0,
            active_branches: 0,
            recent_activity: Vec::new(),
        };
    };

    let current = branches.find(&branches.current_branch);
    let skip = branches.branch_decisions.len().saturating_sub(RECENT_DECISIONS);
    BranchStatusReport {
        initialized: true,
        current_branch: branches.current_branch.clone(),
        current_branch_name: current.map(|b| b.name.clone()),
        current_framing: current.and_then(|b| b.methodological_framing),
        total_branches: branches.branches.len(),
        active_branches: branches.count(BranchStatus::Active),
        recent_activity: branches.branch_decisions[skip..]
            .iter()
            .map(|d| RecentDecision {
                action: d.action,
                branch: d.branch_id.clone(),
                date: d.timestamp.map(|t| t.date_naive()),
            })
            .collect(),
    }
}
