//! Friction triggers
//!
//! Workflow moments where the researcher is asked to slow down. Each
//! trigger has a fixed friction level, a condition over the document and
//! caller context, and optionally a cooldown. Every trigger that fires is
//! appended to the friction log, and so is every bypass. Cooldowns are
//! measured against that log, so they hold across separate invocations.
//!
//! | trigger               | level     | fires when                                   |
//! |-----------------------|-----------|----------------------------------------------|
//! | `pre_stage2`          | hard_stop | stage2 requested before stage1 is grounded   |
//! | `post_five_documents` | challenge | coded count is a positive multiple of 5      |
//! | `epistemic_coherence` | silent    | always (logged only)                         |
//! | `session_end`         | nudge     | always                                       |
//! | `rapid_coding`        | challenge | at least 3 documents within 10 minutes       |

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::{ProjectState, Stage};
use crate::error::{FrictionError, PersistError};
use crate::events::jsonl;
use crate::events::types::FRICTION_BYPASSED;
use crate::lock::Locker;
use crate::rules::FrictionLevel;

const RECENT_EVENTS: usize = 5;
const RAPID_MIN_DOCUMENTS: u64 = 3;
const RAPID_WINDOW_MINUTES: f64 = 10.0;
const PAUSE_EVERY: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrictionTrigger {
    /// Before stage2 tools are used
    PreStage2,
    /// Every fifth coded document
    PostFiveDocuments,
    /// After a coding session; handled by the coherence checker
    EpistemicCoherence,
    SessionEnd,
    RapidCoding,
}

impl FrictionTrigger {
    pub const ALL: [FrictionTrigger; 5] = [
        Self::PreStage2,
        Self::PostFiveDocuments,
        Self::EpistemicCoherence,
        Self::SessionEnd,
        Self::RapidCoding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreStage2 => "pre_stage2",
            Self::PostFiveDocuments => "post_five_documents",
            Self::EpistemicCoherence => "epistemic_coherence",
            Self::SessionEnd => "session_end",
            Self::RapidCoding => "rapid_coding",
        }
    }

    pub fn level(&self) -> FrictionLevel {
        match self {
            Self::PreStage2 => FrictionLevel::HardStop,
            Self::PostFiveDocuments | Self::RapidCoding => FrictionLevel::Challenge,
            Self::EpistemicCoherence => FrictionLevel::Silent,
            Self::SessionEnd => FrictionLevel::Nudge,
        }
    }

    pub fn bypassable(&self) -> bool {
        !matches!(self, Self::PreStage2)
    }

    pub fn cooldown(&self) -> Option<Duration> {
        match self {
            Self::PostFiveDocuments => Some(Duration::minutes(30)),
            _ => None,
        }
    }
}

impl fmt::Display for FrictionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FrictionTrigger {
    type Err = FrictionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FrictionError::UnknownTrigger(s.to_string()))
    }
}

/// Caller-side facts a trigger condition may need
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrictionContext {
    pub requested_stage: Option<Stage>,
    /// Defaults to the document's `documents_coded`
    pub documents_coded: Option<u64>,
    /// Documents coded within `minutes`
    pub count: Option<u64>,
    pub minutes: Option<f64>,
}

/// A trigger that fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrictionCheck {
    pub trigger: FrictionTrigger,
    pub level: FrictionLevel,
    /// `None` for silent triggers
    pub message: Option<String>,
    pub bypassable: bool,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

/// One line of the friction log: a fired trigger or a bypass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrictionRecord {
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    /// `friction_bypassed` for bypasses, absent for fired triggers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub trigger: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<FrictionLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FrictionRecord {
    pub fn is_bypass(&self) -> bool {
        self.event.as_deref() == Some(FRICTION_BYPASSED)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrictionSummary {
    pub total_events: usize,
    /// Fired triggers per level; bypasses are counted under `bypassed`
    pub by_level: BTreeMap<String, usize>,
    pub recent_events: Vec<FrictionRecord>,
}

fn message(trigger: FrictionTrigger, state: &ProjectState, ctx: &FrictionContext, min_manual: u64) -> Option<String> {
    match trigger {
        FrictionTrigger::PreStage2 => Some(format!(
            "Stage 2 tools require a grounded foundation.\n\n\
             You've coded {} documents manually.\n\
             Stage 2 requires at least {min_manual} for theoretical sensitivity.\n\n\
             Without this foundation you risk the \"calculator mindset\": \
             accepting AI-generated codes without understanding why.\n\n\
             [Continue Stage 1 work]",
            state.documents_manually_coded
        )),
        FrictionTrigger::PostFiveDocuments => Some(format!(
            "Interpretive Pause\n\n\
             You've coded {} documents. Before continuing:\n\n\
             What pattern surprised you?\n\
             What are you now seeing differently?\n\
             What deserves an analytical memo?\n\n\
             [I've reflected] [Take me to memos]",
            ctx.documents_coded.unwrap_or(state.documents_coded)
        )),
        FrictionTrigger::EpistemicCoherence => None,
        FrictionTrigger::SessionEnd => Some(
            "Before ending this session:\n\n\
             What interpretive decision are you least certain about?\n\
             What would change your mind?\n\n\
             (Response optional but encouraged)"
                .to_string(),
        ),
        FrictionTrigger::RapidCoding => Some(format!(
            "Rapid Coding Detected\n\n\
             You've coded {} documents in {} minutes.\n\
             This suggests surface-level engagement.\n\n\
             Qualitative analysis requires deep reading. Consider:\n\
             - Slowing down for close reading\n\
             - Writing memos on what surprises you\n\
             - Questioning your initial interpretations\n\n\
             [I'll slow down] [I have good reason]",
            ctx.count.unwrap_or(0),
            ctx.minutes.unwrap_or(1.0)
        )),
    }
}

/// Friction checks for one project, logging to its friction log
pub struct FrictionSystem {
    log_path: PathBuf,
    min_manual_documents: u64,
    locker: Arc<dyn Locker>,
}

impl FrictionSystem {
    pub fn new(log_path: impl AsRef<Path>, min_manual_documents: u64, locker: Arc<dyn Locker>) -> Self {
        let log_path = log_path.as_ref().to_path_buf();
        debug!(?log_path, min_manual_documents, "FrictionSystem::new: called");
        Self {
            log_path,
            min_manual_documents,
            locker,
        }
    }

    pub fn for_project(project_root: &Path, config: &Config, locker: Arc<dyn Locker>) -> Self {
        Self::new(
            config.friction_log_path(project_root),
            config.min_manual_documents,
            locker,
        )
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Whether `trigger`'s condition holds, ignoring cooldowns
    pub fn condition_met(&self, trigger: FrictionTrigger, state: &ProjectState, ctx: &FrictionContext) -> bool {
        match trigger {
            FrictionTrigger::PreStage2 => {
                ctx.requested_stage == Some(Stage::Stage2)
                    && !state.stage1_complete
                    && state.documents_manually_coded < self.min_manual_documents
            }
            FrictionTrigger::PostFiveDocuments => {
                let coded = ctx.documents_coded.unwrap_or(state.documents_coded);
                coded > 0 && coded % PAUSE_EVERY == 0
            }
            FrictionTrigger::EpistemicCoherence | FrictionTrigger::SessionEnd => true,
            FrictionTrigger::RapidCoding => {
                ctx.count.unwrap_or(0) >= RAPID_MIN_DOCUMENTS && ctx.minutes.unwrap_or(1.0) <= RAPID_WINDOW_MINUTES
            }
        }
    }

    /// Last time `trigger` fired, from the log
    fn last_fired(&self, trigger: FrictionTrigger) -> Result<Option<DateTime<Utc>>, PersistError> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .find(|r| !r.is_bypass() && r.trigger == trigger.as_str())
            .map(|r| r.timestamp))
    }

    /// Evaluate `trigger` and log it if it fires
    ///
    /// `None` when the condition does not hold or the trigger is cooling down.
    pub fn check(
        &self,
        trigger: FrictionTrigger,
        state: &ProjectState,
        ctx: &FrictionContext,
        now: DateTime<Utc>,
    ) -> Result<Option<FrictionCheck>, PersistError> {
        debug!(%trigger, ?ctx, "FrictionSystem::check: called");
        if let Some(cooldown) = trigger.cooldown()
            && let Some(last) = self.last_fired(trigger)?
            && now - last < cooldown
        {
            debug!(%trigger, %last, "FrictionSystem::check: cooling down");
            return Ok(None);
        }
        if !self.condition_met(trigger, state, ctx) {
            return Ok(None);
        }

        let check = FrictionCheck {
            trigger,
            level: trigger.level(),
            message: message(trigger, state, ctx, self.min_manual_documents),
            bypassable: trigger.bypassable(),
            timestamp: now,
        };
        let record = FrictionRecord {
            timestamp: now,
            event: None,
            trigger: trigger.as_str().to_string(),
            level: Some(check.level),
            result: Some(serde_json::to_value(&check)?),
            justification: None,
            extra: Map::new(),
        };
        jsonl::append_record(&self.log_path, &record, self.locker.as_ref())?;
        info!(%trigger, level = %check.level, "Friction triggered");
        Ok(Some(check))
    }

    /// Record that the researcher chose to continue past `trigger`
    pub fn record_bypass(
        &self,
        trigger: FrictionTrigger,
        justification: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FrictionRecord, FrictionError> {
        debug!(%trigger, "FrictionSystem::record_bypass: called");
        if !trigger.bypassable() {
            return Err(FrictionError::NotBypassable(trigger));
        }
        let record = FrictionRecord {
            timestamp: now,
            event: Some(FRICTION_BYPASSED.to_string()),
            trigger: trigger.as_str().to_string(),
            level: None,
            result: None,
            justification: justification.map(str::to_string),
            extra: Map::new(),
        };
        jsonl::append_record(&self.log_path, &record, self.locker.as_ref())?;
        Ok(record)
    }

    /// Every parseable log line, oldest first
    pub fn read_all(&self) -> Result<Vec<FrictionRecord>, PersistError> {
        jsonl::read_records(&self.log_path, self.locker.as_ref())
    }

    pub fn summary(&self) -> Result<FrictionSummary, PersistError> {
        let mut records = self.read_all()?;
        let mut by_level = BTreeMap::new();
        for record in &records {
            let key = match (record.is_bypass(), record.level) {
                (true, _) => "bypassed",
                (false, Some(level)) => level.as_str(),
                (false, None) => "unknown",
            };
            *by_level.entry(key.to_string()).or_insert(0) += 1;
        }

        let total_events = records.len();
        let skip = total_events.saturating_sub(RECENT_EVENTS);
        Ok(FrictionSummary {
            total_events,
            by_level,
            recent_events: records.split_off(skip),
        })
    }
}
