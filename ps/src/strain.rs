//! Strain detector
//!
//! Counts rule overrides per rule, scoped to the phase they happened in.
//! When overrides within one phase reach the threshold the rule is flagged
//! as strained and a one-time review prompt is produced. Flags and counters
//! are only cleared by an explicit resolution or by moving to a new phase.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{Phase, ProjectState};
use crate::error::RuleError;
use crate::rules::{is_known_rule, rule_name};

/// Strain bookkeeping stored under `research_design.strain_tracking`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrainTracking {
    /// Rule name -> counter for the phase it was last overridden in
    #[serde(deserialize_with = "crate::domain::lenient::map")]
    pub override_counts: BTreeMap<String, OverrideCounter>,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub strain_threshold: u32,
    /// Rules currently flagged, in the order they were flagged
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub strained_rules: Vec<String>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub strain_reviews: Vec<StrainReview>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for StrainTracking {
    fn default() -> Self {
        Self::with_threshold(crate::DEFAULT_STRAIN_THRESHOLD)
    }
}

impl StrainTracking {
    pub fn with_threshold(strain_threshold: u32) -> Self {
        Self {
            override_counts: BTreeMap::new(),
            strain_threshold,
            strained_rules: Vec::new(),
            strain_reviews: Vec::new(),
            extra: Map::new(),
        }
    }

    fn is_flagged(&self, rule: &str) -> bool {
        self.strained_rules.iter().any(|r| r == rule)
    }

    fn unflag(&mut self, rule: &str) {
        self.strained_rules.retain(|r| r != rule);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideCounter {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub count: u32,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize_opt")]
    pub last_override: Option<DateTime<Utc>>,
    /// Phase the current count belongs to
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub phase_when_overridden: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry in `research_design.rule_overrides`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub rule_id: String,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub justification: String,
    #[serde(default, deserialize_with = "crate::domain::lenient::seq")]
    pub compensatory_moves: Vec<Value>,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub outcome: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry in `strain_tracking.strain_reviews`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrainReview {
    pub rule_id: String,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize")]
    pub triggered_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub override_count: u32,
    pub resolution: String,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub notes: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a strain review was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The study moved on; reset the counter and clear the flag
    PhaseTransition,
    /// The rule will be reconfigured
    AdjustRule,
    /// The rule stays as is; overrides are noted
    KeepRule,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhaseTransition => "phase_transition",
            Self::AdjustRule => "adjust_rule",
            Self::KeepRule => "keep_rule",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phase_transition" => Ok(Self::PhaseTransition),
            "adjust_rule" => Ok(Self::AdjustRule),
            "keep_rule" => Ok(Self::KeepRule),
            other => Err(RuleError::UnknownResolution(other.to_string())),
        }
    }
}

/// Result of [`StrainDetector::record_override`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideOutcome {
    pub rule_id: String,
    pub override_count: u32,
    pub threshold: u32,
    pub is_strained: bool,
    pub phase: Phase,
    /// Set only on the override that first crosses the threshold
    pub first_time_strained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strain_prompt: Option<String>,
}

/// Strain state of one rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStrain {
    pub rule_id: String,
    pub override_count: u32,
    pub last_override: Option<DateTime<Utc>>,
    pub phase: Option<String>,
    pub is_strained: bool,
}

/// Result of [`StrainDetector::check_strain`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrainReport {
    pub has_strain: bool,
    pub threshold: u32,
    /// The requested rule, or every rule at or over the threshold
    pub rules: Vec<RuleStrain>,
    /// Rules flagged and awaiting review
    pub strained_rules: Vec<String>,
}

/// Result of [`StrainDetector::record_resolution`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionOutcome {
    pub rule_id: String,
    pub resolution: Resolution,
    pub override_count: u32,
    /// Counter was reset and the flag cleared
    pub reset: bool,
}

/// Strain operations over a loaded document
///
/// Holds only the threshold used when a document has no strain section yet;
/// a threshold stored in the document wins.
#[derive(Debug, Clone, Copy)]
pub struct StrainDetector {
    default_threshold: u32,
}

impl Default for StrainDetector {
    fn default() -> Self {
        Self::new(crate::DEFAULT_STRAIN_THRESHOLD)
    }
}

impl StrainDetector {
    pub fn new(default_threshold: u32) -> Self {
        Self { default_threshold }
    }

    fn threshold_of(&self, tracking: Option<&StrainTracking>) -> u32 {
        tracking.map(|t| t.strain_threshold).unwrap_or(self.default_threshold)
    }

    /// Count an override of `rule` made during `phase`
    ///
    /// A counter last touched in a different phase restarts at zero, and the
    /// rule loses any strain flag from that phase.
    pub fn record_override(
        &self,
        state: &mut ProjectState,
        rule: &str,
        justification: Option<&str>,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Result<OverrideOutcome, RuleError> {
        debug!(%rule, %phase, "StrainDetector::record_override: called");
        if !is_known_rule(state, rule) {
            return Err(RuleError::UnknownRule(rule.to_string()));
        }
        let rule_id = rule_name(rule);
        let default_threshold = self.default_threshold;

        let design = state.research_design_mut();
        design.rule_overrides.push(OverrideRecord {
            rule_id: rule_id.clone(),
            timestamp: now,
            justification: justification.unwrap_or_default().to_string(),
            compensatory_moves: Vec::new(),
            outcome: "pending".to_string(),
            extra: Map::new(),
        });

        let tracking = design
            .strain_tracking
            .get_or_insert_with(|| StrainTracking::with_threshold(default_threshold));
        let threshold = tracking.strain_threshold;

        let counter = tracking
            .override_counts
            .entry(rule_id.clone())
            .or_insert_with(|| OverrideCounter {
                phase_when_overridden: phase.as_str().to_string(),
                ..Default::default()
            });

        let phase_changed = counter.phase_when_overridden != phase.as_str();
        if phase_changed {
            debug!(%rule_id, from = %counter.phase_when_overridden, to = %phase, "record_override: phase changed, count reset");
            counter.count = 0;
            counter.phase_when_overridden = phase.as_str().to_string();
        }
        counter.count += 1;
        counter.last_override = Some(now);
        let count = counter.count;

        if phase_changed {
            tracking.unflag(&rule_id);
        }

        let is_strained = count >= threshold;
        let first_time_strained = is_strained && !tracking.is_flagged(&rule_id);
        if first_time_strained {
            tracking.strained_rules.push(rule_id.clone());
            info!(%rule_id, count, threshold, "Rule reached strain threshold");
        }

        Ok(OverrideOutcome {
            strain_prompt: first_time_strained.then(|| strain_prompt(&rule_id, count)),
            rule_id,
            override_count: count,
            threshold,
            is_strained,
            phase,
            first_time_strained,
        })
    }

    /// Current strain for one rule, or for every rule when `rule` is `None`
    pub fn check_strain(&self, state: &ProjectState, rule: Option<&str>) -> StrainReport {
        let tracking = state.research_design.as_ref().and_then(|d| d.strain_tracking.as_ref());
        let threshold = self.threshold_of(tracking);

        let strain_of = |rule_id: &str, counter: Option<&OverrideCounter>| {
            let count = counter.map(|c| c.count).unwrap_or(0);
            RuleStrain {
                rule_id: rule_id.to_string(),
                override_count: count,
                last_override: counter.and_then(|c| c.last_override),
                phase: counter.map(|c| c.phase_when_overridden.clone()),
                is_strained: count >= threshold,
            }
        };

        let rules: Vec<RuleStrain> = match rule {
            Some(rule) => {
                let rule_id = rule_name(rule);
                let counter = tracking.and_then(|t| t.override_counts.get(&rule_id));
                vec![strain_of(&rule_id, counter)]
            }
            None => tracking
                .map(|t| {
                    t.override_counts
                        .iter()
                        .filter(|(_, c)| c.count >= threshold)
                        .map(|(id, c)| strain_of(id, Some(c)))
                        .collect()
                })
                .unwrap_or_default(),
        };

        StrainReport {
            has_strain: rules.iter().any(|r| r.is_strained),
            threshold,
            rules,
            strained_rules: tracking.map(|t| t.strained_rules.clone()).unwrap_or_default(),
        }
    }

    /// Record how a strain review was resolved
    ///
    /// Every resolution is logged in `strain_reviews`. Only a phase transition
    /// resets the counter and clears the flag.
    pub fn record_resolution(
        &self,
        state: &mut ProjectState,
        rule: &str,
        resolution: Resolution,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ResolutionOutcome, RuleError> {
        debug!(%rule, %resolution, "StrainDetector::record_resolution: called");
        let rule_id = rule_name(rule);

        let Some(tracking) = state
            .research_design
            .as_mut()
            .and_then(|d| d.strain_tracking.as_mut())
            .filter(|t| t.override_counts.contains_key(&rule_id))
        else {
            return Err(RuleError::UnknownRule(rule.to_string()));
        };

        let override_count = tracking.override_counts.get(&rule_id).map(|c| c.count).unwrap_or(0);
        tracking.strain_reviews.push(StrainReview {
            rule_id: rule_id.clone(),
            triggered_at: now,
            override_count,
            resolution: resolution.as_str().to_string(),
            notes: notes.unwrap_or_default().to_string(),
            extra: Map::new(),
        });

        let reset = resolution == Resolution::PhaseTransition;
        if reset {
            if let Some(counter) = tracking.override_counts.get_mut(&rule_id) {
                counter.count = 0;
            }
            tracking.unflag(&rule_id);
        }

        info!(%rule_id, %resolution, reset, "Strain review resolved");
        Ok(ResolutionOutcome {
            rule_id,
            resolution,
            override_count,
            reset,
        })
    }
}

/// Review prompt shown when a rule first reaches the strain threshold
pub fn strain_prompt(rule: &str, override_count: u32) -> String {
    match rule_name(rule).as_str() {
        "case-isolation" => format!(
            "You've overridden case isolation {override_count} times this phase. That isn't wrong; \
             it may mean your study is evolving.\n\n\
             Are you...\n\
             [A] Moving toward cross-case synthesis (ready for a phase transition?)\n\
             [B] Finding the rule too strict for your methodology\n\
             [C] Just exploring, so keep the rule but note the pattern\n\n\
             What feels right?"
        ),
        "wave-isolation" => format!(
            "You've crossed wave boundaries {override_count} times this phase. Let's check in on this pattern.\n\n\
             Are you...\n\
             [A] Ready for cross-wave analysis (natural progression?)\n\
             [B] Finding temporal isolation doesn't fit your approach\n\
             [C] Exploring specific connections (legitimate, but note it)\n\n\
             What's happening in your analysis?"
        ),
        "stream-separation" => format!(
            "You've integrated theory and data {override_count} times before the synthesis phase.\n\n\
             Are you...\n\
             [A] Ready to move to synthesis (are the streams mature enough?)\n\
             [B] Finding parallel streams too artificial for your work\n\
             [C] Using theoretical sampling (methodologically appropriate)\n\n\
             How would you characterize what's happening?"
        ),
        other => format!(
            "You've overridden the {other} rule {override_count} times. \
             Let's review whether this rule fits your evolving methodology."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_third_override_strains_once() {
        let detector = StrainDetector::default();
        let mut state = ProjectState::default();
        let phase = Phase::Phase1ParallelStreams;

        let first = detector.record_override(&mut state, "stream-separation", Some("theory memo"), phase, now()).unwrap();
        assert_eq!(first.override_count, 1);
        assert!(!first.is_strained);

        detector.record_override(&mut state, "stream-separation", None, phase, now()).unwrap();
        let third = detector.record_override(&mut state, "stream-separation", None, phase, now()).unwrap();
        assert!(third.is_strained);
        assert!(third.first_time_strained);
        assert!(third.strain_prompt.as_deref().unwrap().contains("3 times"));

        let fourth = detector.record_override(&mut state, "stream-separation", None, phase, now()).unwrap();
        assert!(fourth.is_strained);
        assert!(!fourth.first_time_strained);
        assert!(fourth.strain_prompt.is_none());

        let design = state.research_design.as_ref().unwrap();
        assert_eq!(design.rule_overrides.len(), 4);
        assert_eq!(design.rule_overrides[0].outcome, "pending");
        assert_eq!(design.rule_overrides[0].justification, "theory memo");
    }

    #[test]
    fn test_phase_change_resets_count() {
        let detector = StrainDetector::default();
        let mut state = ProjectState::default();

        for _ in 0..2 {
            detector
                .record_override(&mut state, "stream-separation", None, Phase::Phase1ParallelStreams, now())
                .unwrap();
        }
        let outcome = detector
            .record_override(&mut state, "stream-separation", None, Phase::Phase2Synthesis, now())
            .unwrap();

        assert_eq!(outcome.override_count, 1);
        assert!(!outcome.is_strained);
        assert!(!detector.check_strain(&state, None).has_strain);
    }

    #[test]
    fn test_phase_change_clears_flag() {
        let detector = StrainDetector::default();
        let mut state = ProjectState::default();
        for _ in 0..3 {
            detector
                .record_override(&mut state, "stream-separation", None, Phase::Phase1ParallelStreams, now())
                .unwrap();
        }
        assert_eq!(detector.check_strain(&state, None).strained_rules, vec!["stream-separation"]);

        detector
            .record_override(&mut state, "stream-separation", None, Phase::Phase2Synthesis, now())
            .unwrap();
        assert!(detector.check_strain(&state, None).strained_rules.is_empty());
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let detector = StrainDetector::default();
        let mut state = ProjectState::default();
        let err = detector
            .record_override(&mut state, "speaker-isolation", None, Phase::Stage1Foundation, now())
            .unwrap_err();
        assert_eq!(err, RuleError::UnknownRule("speaker-isolation".to_string()));
        assert!(state.research_design.is_none());
    }

    #[test]
    fn test_stored_threshold_wins() {
        let detector = StrainDetector::new(5);
        let mut state = ProjectState::default();
        state.research_design_mut().strain_mut().strain_threshold = 2;

        detector.record_override(&mut state, "case_isolation", None, Phase::Stage1Foundation, now()).unwrap();
        let second = detector
            .record_override(&mut state, "case_isolation", None, Phase::Stage1Foundation, now())
            .unwrap();
        assert_eq!(second.rule_id, "case-isolation");
        assert_eq!(second.threshold, 2);
        assert!(second.first_time_strained);
    }

    #[test]
    fn test_check_strain_is_pure() {
        let detector = StrainDetector::default();
        let state = ProjectState::default();
        let report = detector.check_strain(&state, Some("case-isolation"));
        assert!(!report.has_strain);
        assert_eq!(report.rules[0].override_count, 0);
        assert_eq!(report.threshold, 3);
        assert!(state.research_design.is_none());
    }

    #[test]
    fn test_resolutions() {
        let detector = StrainDetector::default();
        let mut state = ProjectState::default();
        let start = now();
        for i in 0..3 {
            detector
                .record_override(
                    &mut state,
                    "stream-separation",
                    None,
                    Phase::Phase1ParallelStreams,
                    start + Duration::seconds(i),
                )
                .unwrap();
        }

        let keep = detector
            .record_resolution(&mut state, "stream-separation", Resolution::KeepRule, Some("sampling"), now())
            .unwrap();
        assert!(!keep.reset);
        assert!(detector.check_strain(&state, Some("stream-separation")).has_strain);

        let moved = detector
            .record_resolution(&mut state, "stream-separation", Resolution::PhaseTransition, None, now())
            .unwrap();
        assert!(moved.reset);
        assert_eq!(moved.override_count, 3);

        let report = detector.check_strain(&state, Some("stream-separation"));
        assert!(!report.has_strain);
        assert!(report.strained_rules.is_empty());

        let tracking = state.research_design.as_ref().unwrap().strain_tracking.as_ref().unwrap();
        assert_eq!(tracking.strain_reviews.len(), 2);
        assert_eq!(tracking.strain_reviews[0].resolution, "keep_rule");
        assert_eq!(tracking.strain_reviews[0].notes, "sampling");
    }

    #[test]
    fn test_resolution_for_rule_without_counter() {
        let detector = StrainDetector::default();
        let mut state = ProjectState::default();
        assert!(matches!(
            detector.record_resolution(&mut state, "case-isolation", Resolution::AdjustRule, None, now()),
            Err(RuleError::UnknownRule(_))
        ));
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("adjust_rule".parse::<Resolution>().unwrap(), Resolution::AdjustRule);
        assert_eq!(
            "ignore_it".parse::<Resolution>(),
            Err(RuleError::UnknownResolution("ignore_it".to_string()))
        );
    }

    #[test]
    fn test_generic_prompt_names_rule() {
        let prompt = strain_prompt("site_isolation", 4);
        assert!(prompt.contains("site-isolation rule 4 times"));
    }
}
