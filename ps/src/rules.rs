//! Rule relaxation engine
//!
//! Isolation rules keep analytic material apart until the workflow reaches
//! the phase where mixing it is methodologically sound. Each rule names the
//! phase it relaxes at; the engine compares that against the phase derived
//! from the document and partitions the enabled rules into relaxed and
//! still-active.
//!
//! Rules are keyed in the document by snake_case key (`case_isolation`) and
//! reported under their kebab-case name (`case-isolation`). Either form is
//! accepted as input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{Phase, ProjectState, ResearchDesign, current_phase, should_relax};
use crate::error::RuleError;

/// How strongly a rule pushes back when crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrictionLevel {
    #[default]
    Silent,
    Nudge,
    Challenge,
    HardStop,
}

impl FrictionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Nudge => "nudge",
            Self::Challenge => "challenge",
            Self::HardStop => "hard_stop",
        }
    }
}

impl fmt::Display for FrictionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FrictionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "silent" => Ok(Self::Silent),
            "nudge" => Ok(Self::Nudge),
            "challenge" => Ok(Self::Challenge),
            "hard_stop" => Ok(Self::HardStop),
            _ => Err(format!("unknown friction level: {s}")),
        }
    }
}

/// One configured isolation rule as stored in `research_design.isolation_config`
///
/// Values stay as written so that hand-edited documents with unexpected
/// values still load; they are interpreted when rules are checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationRule {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub relaxes_at: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "crate::domain::lenient::or_default")]
    pub friction_level: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IsolationRule {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applies {
    Always,
    WhenCases,
    WhenWaves,
}

/// Built-in rule and its defaults
#[derive(Debug, Clone, Copy)]
pub struct BuiltinRule {
    pub key: &'static str,
    pub relaxes_at: Phase,
    pub friction: FrictionLevel,
    applies: Applies,
}

impl BuiltinRule {
    /// Whether the research design gives this rule anything to isolate
    pub fn applies_to(&self, design: &ResearchDesign) -> bool {
        match self.applies {
            Applies::Always => true,
            Applies::WhenCases => !design.cases.is_empty(),
            Applies::WhenWaves => !design.waves.is_empty(),
        }
    }
}

pub static BUILTIN_RULES: [BuiltinRule; 3] = [
    BuiltinRule {
        key: "case_isolation",
        relaxes_at: Phase::Phase3PatternCharacterization,
        friction: FrictionLevel::Challenge,
        applies: Applies::WhenCases,
    },
    BuiltinRule {
        key: "wave_isolation",
        relaxes_at: Phase::CrossWaveAnalysis,
        friction: FrictionLevel::Challenge,
        applies: Applies::WhenWaves,
    },
    BuiltinRule {
        key: "stream_separation",
        relaxes_at: Phase::Phase2Synthesis,
        friction: FrictionLevel::Nudge,
        applies: Applies::Always,
    },
];

/// Friction for rules with no built-in default
const DEFAULT_FRICTION: FrictionLevel = FrictionLevel::Challenge;

/// `case_isolation` -> `case-isolation`
pub fn rule_name(key: &str) -> String {
    key.replace('_', "-")
}

/// `case-isolation` -> `case_isolation`
pub fn rule_key(name: &str) -> String {
    name.replace('-', "_")
}

fn builtin(key: &str) -> Option<&'static BuiltinRule> {
    BUILTIN_RULES.iter().find(|r| r.key == key)
}

/// Evaluated status of one rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStatus {
    pub name: String,
    /// Phase the rule relaxes at; `None` means it never relaxes
    pub relaxes_at: Option<String>,
    /// Configured friction
    pub friction_level: FrictionLevel,
    /// `silent` once relaxed, otherwise the configured friction
    pub effective_friction: FrictionLevel,
    pub relaxed: bool,
}

/// Stage fields the phase was derived from
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseDetails {
    pub stage: Option<String>,
    pub stage1_complete: Option<bool>,
    pub stage2_progress: Option<Map<String, Value>>,
}

/// Partition of enabled rules at the current phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStatusReport {
    pub current_phase: Phase,
    pub rules_should_relax: Vec<RuleStatus>,
    pub rules_still_active: Vec<RuleStatus>,
    pub phase_details: PhaseDetails,
}

impl RuleStatusReport {
    /// Every evaluated rule, relaxed ones first
    pub fn all(&self) -> impl Iterator<Item = &RuleStatus> {
        self.rules_should_relax.iter().chain(self.rules_still_active.iter())
    }

    pub fn find(&self, name: &str) -> Option<&RuleStatus> {
        let name = rule_name(name);
        self.all().find(|r| r.name == name)
    }
}

fn evaluate(
    key: &str,
    configured: Option<&IsolationRule>,
    defaults: Option<&BuiltinRule>,
    phase: Phase,
) -> RuleStatus {
    let relaxes_at = configured
        .and_then(|c| c.relaxes_at.clone())
        .or_else(|| defaults.map(|d| d.relaxes_at.as_str().to_string()));

    let default_friction = defaults.map(|d| d.friction).unwrap_or(DEFAULT_FRICTION);
    let friction_level = match configured.and_then(|c| c.friction_level.as_deref()) {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            debug!(%key, error = %e, "evaluate: falling back to default friction");
            default_friction
        }),
        None => default_friction,
    };

    let relaxed = relaxes_at.as_deref().is_some_and(|at| should_relax(at, phase));

    RuleStatus {
        name: rule_name(key),
        relaxes_at,
        friction_level,
        effective_friction: if relaxed { FrictionLevel::Silent } else { friction_level },
        relaxed,
    }
}

/// Evaluate every enabled rule against the document's current phase
///
/// Built-in rules are evaluated first, in a fixed order, and only when the
/// research design has something for them to isolate. Any other configured
/// rule follows in key order. Pure: the document is not touched.
pub fn check_rules(state: &ProjectState) -> RuleStatusReport {
    let phase = current_phase(state.sandwich_status.as_ref());
    debug!(%phase, "check_rules: called");

    let fallback = ResearchDesign::default();
    let design = state.research_design.as_ref().unwrap_or(&fallback);
    let config = &design.isolation_config;

    let mut report = RuleStatusReport {
        current_phase: phase,
        rules_should_relax: Vec::new(),
        rules_still_active: Vec::new(),
        phase_details: PhaseDetails {
            stage: state.sandwich_status.as_ref().map(|s| s.current_stage.clone()),
            stage1_complete: state.sandwich_status.as_ref().and_then(|s| s.stage1_complete),
            stage2_progress: state.sandwich_status.as_ref().map(|s| s.stage2_progress.clone()),
        },
    };

    let mut push = |status: RuleStatus| {
        if status.relaxed {
            report.rules_should_relax.push(status);
        } else {
            report.rules_still_active.push(status);
        }
    };

    for rule in &BUILTIN_RULES {
        let configured = config.get(rule.key);
        if configured.is_some_and(|c| !c.is_enabled()) || !rule.applies_to(design) {
            continue;
        }
        push(evaluate(rule.key, configured, Some(rule), phase));
    }

    for (key, configured) in config {
        if builtin(key).is_some() || !configured.is_enabled() {
            continue;
        }
        push(evaluate(key, Some(configured), None, phase));
    }

    report
}

/// Rule names that overrides and toggles may refer to
pub fn known_rule_names(state: &ProjectState) -> Vec<String> {
    let mut names: Vec<String> = BUILTIN_RULES.iter().map(|r| rule_name(r.key)).collect();
    if let Some(design) = &state.research_design {
        for key in design.isolation_config.keys() {
            let name = rule_name(key);
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

pub fn is_known_rule(state: &ProjectState, rule: &str) -> bool {
    known_rule_names(state).contains(&rule_name(rule))
}

/// Enable or disable a rule; rules are never removed
pub fn set_rule_enabled(state: &mut ProjectState, rule: &str, enabled: bool) -> Result<(), RuleError> {
    debug!(%rule, enabled, "set_rule_enabled: called");
    if !is_known_rule(state, rule) {
        return Err(RuleError::UnknownRule(rule.to_string()));
    }

    let key = rule_key(rule);
    let design = state.research_design_mut();
    let entry = design.isolation_config.entry(key.clone()).or_default();
    if entry.relaxes_at.is_none()
        && let Some(defaults) = builtin(&key)
    {
        entry.relaxes_at = Some(defaults.relaxes_at.as_str().to_string());
        entry.friction_level = Some(defaults.friction.as_str().to_string());
    }
    entry.enabled = Some(enabled);
    Ok(())
}
