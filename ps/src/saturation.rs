//! Saturation assessor
//!
//! Four signals are tracked independently and only combined when an
//! assessment is requested:
//!
//! | signal          | max | source                                         |
//! |-----------------|-----|------------------------------------------------|
//! | code generation | 30  | rolling mean of new codes over the last 5 docs |
//! | coverage        | 25  | share of codes present in >= 20% of documents  |
//! | refinement      | 25  | definition changes in the last 5 days          |
//! | redundancy      | 20  | externally supplied score in [0, 1]            |
//!
//! Every signal also produces an evidence line naming the branch that fired
//! and the value it fired on.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Documents in the generation-rate window
const GENERATION_WINDOW: usize = 5;
/// Data points needed before stabilization can be declared
const MIN_GENERATION_POINTS: usize = 3;
/// Changes considered, and the cap on the recent count
const REFINEMENT_WINDOW: usize = 10;
const REFINEMENT_DAYS: i64 = 5;
/// Coverage percent a code needs to count towards adequate coverage
const ADEQUATE_CODE_COVERAGE: f64 = 20.0;
const RARE_BELOW: f64 = 10.0;
const UNIVERSAL_ABOVE: f64 = 80.0;

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Tunable thresholds, stored in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub code_generation_stable: f64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub refinement_stable: u32,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub redundancy_high: f64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub coverage_adequate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            code_generation_stable: 0.5,
            refinement_stable: 2,
            redundancy_high: 0.85,
            coverage_adequate: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCodes {
    pub document_id: String,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub document_name: String,
    pub new_codes_created: u64,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeGeneration {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub total_codes: u64,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub codes_by_document: Vec<DocumentCodes>,
    /// Rolling mean over the window, rounded to 2 places
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub generation_rate: f64,
    /// First document at which the rate dropped below the stable threshold
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub stabilized_at_document: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeCoverageEntry {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub document_count: u64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub case_count: u64,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub coverage_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeCoverage {
    #[serde(deserialize_with = "crate::domain::lenient::map")]
    pub coverage_by_code: BTreeMap<String, CodeCoverageEntry>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub rare_codes: Vec<String>,
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub universal_codes: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionChange {
    pub code_id: String,
    pub change_type: String,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub old_state: String,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub new_state: String,
    #[serde(default, deserialize_with = "crate::domain::lenient::or_default")]
    pub rationale: String,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Refinement {
    #[serde(deserialize_with = "crate::domain::lenient::seq")]
    pub definition_changes: Vec<DefinitionChange>,
    /// Recent change count as of the last refinement or assessment
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub changes_last_5_documents: u32,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub split_merge_count: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Refinement {
    /// Changes among the last few that fall inside the recent-days window
    fn recent_count(&self, now: DateTime<Utc>) -> u32 {
        let cutoff = now - Duration::days(REFINEMENT_DAYS);
        let start = self.definition_changes.len().saturating_sub(REFINEMENT_WINDOW);
        let recent = self.definition_changes[start..]
            .iter()
            .filter(|c| c.timestamp > cutoff)
            .count();
        recent.min(REFINEMENT_WINDOW) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Redundancy {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub redundancy_score: f64,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize_opt")]
    pub last_assessment: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub assessment_notes: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub threshold: f64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Redundancy {
    fn default() -> Self {
        Self {
            redundancy_score: 0.0,
            last_assessment: None,
            assessment_notes: String::new(),
            threshold: 0.85,
            extra: Map::new(),
        }
    }
}

/// Discrete saturation level, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationLevel {
    #[default]
    Low,
    Emerging,
    Approaching,
    High,
    Saturated,
}

impl SaturationLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Self::Saturated,
            70..=89 => Self::High,
            50..=69 => Self::Approaching,
            25..=49 => Self::Emerging,
            _ => Self::Low,
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Saturated => {
                "Strong saturation signals. Consider: Are there negative cases you haven't explored? \
                 If variation is understood, ready for theoretical integration."
            }
            Self::High => {
                "Approaching saturation. Theoretical sampling: seek cases most different from your \
                 current sample to test your codes."
            }
            Self::Approaching => {
                "Emerging saturation patterns. Continue coding but watch for diminishing returns. \
                 Write memos on variation."
            }
            Self::Emerging => {
                "Early saturation signals. Still actively generating codes and refining concepts. \
                 Stay open to new patterns."
            }
            Self::Low => "Low saturation. Actively developing codes. Focus on open coding and memo writing.",
        }
    }
}

impl fmt::Display for SaturationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Emerging => "emerging",
            Self::Approaching => "approaching",
            Self::High => "high",
            Self::Saturated => "saturated",
        };
        write!(f, "{s}")
    }
}

/// Human-readable reason per signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Evidence {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub code_generation_signal: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub coverage_signal: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub refinement_signal: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub redundancy_signal: String,
}

/// Outcome of the latest assessment, rewritten on every call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationSignals {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub overall_level: SaturationLevel,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize_opt")]
    pub last_assessment: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub recommendation: String,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub evidence: Evidence,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Saturation section stored under `saturation_tracking`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationTracking {
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub code_generation: CodeGeneration,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub code_coverage: CodeCoverage,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub refinement: Refinement,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub redundancy: Redundancy,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub saturation_signals: SaturationSignals,
    #[serde(deserialize_with = "crate::domain::lenient::or_default")]
    pub thresholds: Thresholds,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Coverage input for one code
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageInput {
    pub document_count: u64,
    pub case_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    pub document: String,
    pub new_codes: u64,
    pub total_codes: u64,
    pub generation_rate: f64,
    pub stabilized: bool,
    pub stabilized_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinementOutcome {
    pub code_id: String,
    pub change_type: String,
    pub total_refinements: usize,
    pub split_merge_count: u64,
    pub recent_activity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageOutcome {
    pub total_codes_tracked: usize,
    pub rare_codes: usize,
    pub universal_codes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedundancyOutcome {
    pub redundancy_score: f64,
    pub threshold: f64,
    pub above_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaturationMetrics {
    pub code_generation_rate: f64,
    pub total_codes: u64,
    pub documents_coded: usize,
    pub stabilized_at: Option<String>,
    pub recent_refinements: u32,
    pub redundancy_score: f64,
    pub rare_codes: usize,
    pub universal_codes: usize,
}

/// Result of [`SaturationTracking::assess`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaturationAssessment {
    pub saturation_level: SaturationLevel,
    pub saturation_score: u32,
    pub recommendation: String,
    pub evidence: Evidence,
    pub metrics: SaturationMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSummary {
    pub total_codes: u64,
    pub documents_tracked: usize,
    pub generation_rate: f64,
    pub stabilized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinementSummary {
    pub total_changes: usize,
    pub recent_activity: u32,
    pub splits_merges: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedundancySummary {
    pub score: f64,
    pub last_assessed: Option<DateTime<Utc>>,
}

/// Read-only view returned by [`SaturationTracking::status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaturationStatus {
    pub code_generation: GenerationSummary,
    pub refinement: RefinementSummary,
    pub redundancy: RedundancySummary,
    pub saturation: SaturationSignals,
}

impl SaturationTracking {
    /// Record how many new codes a coded document introduced
    pub fn record_document(
        &mut self,
        doc_id: &str,
        doc_name: Option<&str>,
        new_codes: u64,
        now: DateTime<Utc>,
    ) -> DocumentOutcome {
        debug!(%doc_id, new_codes, "SaturationTracking::record_document: called");
        let generation = &mut self.code_generation;
        generation.codes_by_document.push(DocumentCodes {
            document_id: doc_id.to_string(),
            document_name: doc_name.unwrap_or(doc_id).to_string(),
            new_codes_created: new_codes,
            timestamp: now,
            extra: Map::new(),
        });
        generation.total_codes += new_codes;

        let start = generation.codes_by_document.len().saturating_sub(GENERATION_WINDOW);
        let window = &generation.codes_by_document[start..];
        let mean = window.iter().map(|d| d.new_codes_created as f64).sum::<f64>() / window.len() as f64;
        generation.generation_rate = round_to(mean, 2);

        if generation.stabilized_at_document.is_none()
            && window.len() >= MIN_GENERATION_POINTS
            && mean < self.thresholds.code_generation_stable
        {
            debug!(%doc_id, mean, "record_document: code generation stabilized");
            generation.stabilized_at_document = Some(doc_id.to_string());
        }

        DocumentOutcome {
            document: doc_id.to_string(),
            new_codes,
            total_codes: generation.total_codes,
            generation_rate: generation.generation_rate,
            stabilized: generation.stabilized_at_document.is_some(),
            stabilized_at: generation.stabilized_at_document.clone(),
        }
    }

    /// Record a change to a code's definition
    ///
    /// `split` and `merge` also count towards the structural change total.
    pub fn record_refinement(
        &mut self,
        code_id: &str,
        change_type: &str,
        old_state: Option<&str>,
        new_state: Option<&str>,
        rationale: Option<&str>,
        now: DateTime<Utc>,
    ) -> RefinementOutcome {
        debug!(%code_id, %change_type, "SaturationTracking::record_refinement: called");
        let refinement = &mut self.refinement;
        refinement.definition_changes.push(DefinitionChange {
            code_id: code_id.to_string(),
            change_type: change_type.to_string(),
            old_state: old_state.unwrap_or_default().to_string(),
            new_state: new_state.unwrap_or_default().to_string(),
            rationale: rationale.unwrap_or_default().to_string(),
            timestamp: now,
            extra: Map::new(),
        });
        if matches!(change_type, "split" | "merge") {
            refinement.split_merge_count += 1;
        }
        refinement.changes_last_5_documents = refinement.recent_count(now);

        RefinementOutcome {
            code_id: code_id.to_string(),
            change_type: change_type.to_string(),
            total_refinements: refinement.definition_changes.len(),
            split_merge_count: refinement.split_merge_count,
            recent_activity: refinement.changes_last_5_documents,
        }
    }

    /// Merge per-code document counts and recompute the rare/universal lists
    pub fn update_coverage(&mut self, coverage: &BTreeMap<String, CoverageInput>, documents_coded: u64) -> CoverageOutcome {
        debug!(codes = coverage.len(), documents_coded, "SaturationTracking::update_coverage: called");
        let total = documents_coded.max(1) as f64;
        let tracked = &mut self.code_coverage;

        for (code_id, input) in coverage {
            tracked.coverage_by_code.insert(
                code_id.clone(),
                CodeCoverageEntry {
                    document_count: input.document_count,
                    case_count: input.case_count,
                    coverage_percent: round_to(input.document_count as f64 / total * 100.0, 1),
                },
            );
        }

        tracked.rare_codes.clear();
        tracked.universal_codes.clear();
        for (code_id, entry) in &tracked.coverage_by_code {
            if entry.coverage_percent < RARE_BELOW {
                tracked.rare_codes.push(code_id.clone());
            } else if entry.coverage_percent > UNIVERSAL_ABOVE {
                tracked.universal_codes.push(code_id.clone());
            }
        }

        CoverageOutcome {
            total_codes_tracked: tracked.coverage_by_code.len(),
            rare_codes: tracked.rare_codes.len(),
            universal_codes: tracked.universal_codes.len(),
        }
    }

    /// Store an externally assessed redundancy score, clamped into [0, 1]
    pub fn update_redundancy(&mut self, score: f64, notes: Option<&str>, now: DateTime<Utc>) -> RedundancyOutcome {
        debug!(score, "SaturationTracking::update_redundancy: called");
        let clamped = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        let redundancy = &mut self.redundancy;
        redundancy.redundancy_score = clamped;
        redundancy.last_assessment = Some(now);
        redundancy.assessment_notes = notes.unwrap_or_default().to_string();

        RedundancyOutcome {
            redundancy_score: clamped,
            threshold: redundancy.threshold,
            above_threshold: clamped >= redundancy.threshold,
        }
    }

    fn generation_signal(&self) -> (u32, String) {
        let rate = self.code_generation.generation_rate;
        let stable = self.thresholds.code_generation_stable;
        if rate < stable {
            (30, format!("STABLE: {rate} new codes/doc (threshold: {stable})"))
        } else if rate < stable * 2.0 {
            (15, format!("SLOWING: {rate} new codes/doc"))
        } else {
            (0, format!("ACTIVE: {rate} new codes/doc, still generating"))
        }
    }

    fn coverage_signal(&self) -> (u32, String) {
        let codes = &self.code_coverage.coverage_by_code;
        if codes.is_empty() {
            return (0, "NO DATA: Coverage not yet tracked".to_string());
        }
        let adequate = codes
            .values()
            .filter(|c| c.coverage_percent >= ADEQUATE_CODE_COVERAGE)
            .count();
        let ratio = adequate as f64 / codes.len() as f64;
        let percent = (ratio * 100.0).round_ties_even();
        if ratio >= self.thresholds.coverage_adequate {
            (25, format!("ADEQUATE: {percent}% of codes have >20% coverage"))
        } else {
            // Halves round to even: 2.5 scores 2
            ((ratio * 15.0).round_ties_even() as u32, format!("DEVELOPING: {percent}% coverage ratio"))
        }
    }

    fn refinement_signal(&self, recent: u32) -> (u32, String) {
        let stable = self.thresholds.refinement_stable;
        if recent <= stable {
            (25, format!("STABLE: {recent} changes recently (threshold: {stable})"))
        } else {
            (5, format!("ACTIVE: {recent} recent refinements, concepts still evolving"))
        }
    }

    fn redundancy_signal(&self) -> (u32, String) {
        let score = self.redundancy.redundancy_score;
        let high = self.thresholds.redundancy_high;
        let percent = (score * 100.0).round();
        if score >= high {
            (20, format!("HIGH: {percent}% redundancy"))
        } else if score >= high * 0.7 {
            (12, format!("EMERGING: {percent}% redundancy"))
        } else {
            (0, format!("LOW: {percent}% redundancy, still finding novelty"))
        }
    }

    /// Combine the four signals into a score and level
    ///
    /// Rewrites `saturation_signals` and the stored recent-refinement count.
    pub fn assess(&mut self, now: DateTime<Utc>) -> SaturationAssessment {
        let recent = self.refinement.recent_count(now);
        self.refinement.changes_last_5_documents = recent;

        let (generation_score, code_generation_signal) = self.generation_signal();
        let (coverage_score, coverage_signal) = self.coverage_signal();
        let (refinement_score, refinement_signal) = self.refinement_signal(recent);
        let (redundancy_score, redundancy_signal) = self.redundancy_signal();

        let score = generation_score + coverage_score + refinement_score + redundancy_score;
        let level = SaturationLevel::from_score(score);
        debug!(score, %level, "SaturationTracking::assess: scored");

        let evidence = Evidence {
            code_generation_signal,
            coverage_signal,
            refinement_signal,
            redundancy_signal,
        };
        self.saturation_signals = SaturationSignals {
            overall_level: level,
            last_assessment: Some(now),
            recommendation: level.recommendation().to_string(),
            evidence: evidence.clone(),
            extra: std::mem::take(&mut self.saturation_signals.extra),
        };

        SaturationAssessment {
            saturation_level: level,
            saturation_score: score,
            recommendation: level.recommendation().to_string(),
            evidence,
            metrics: SaturationMetrics {
                code_generation_rate: self.code_generation.generation_rate,
                total_codes: self.code_generation.total_codes,
                documents_coded: self.code_generation.codes_by_document.len(),
                stabilized_at: self.code_generation.stabilized_at_document.clone(),
                recent_refinements: recent,
                redundancy_score: self.redundancy.redundancy_score,
                rare_codes: self.code_coverage.rare_codes.len(),
                universal_codes: self.code_coverage.universal_codes.len(),
            },
        }
    }

    pub fn status(&self) -> SaturationStatus {
        SaturationStatus {
            code_generation: GenerationSummary {
                total_codes: self.code_generation.total_codes,
                documents_tracked: self.code_generation.codes_by_document.len(),
                generation_rate: self.code_generation.generation_rate,
                stabilized: self.code_generation.stabilized_at_document.is_some(),
            },
            refinement: RefinementSummary {
                total_changes: self.refinement.definition_changes.len(),
                recent_activity: self.refinement.changes_last_5_documents,
                splits_merges: self.refinement.split_merge_count,
            },
            redundancy: RedundancySummary {
                score: self.redundancy.redundancy_score,
                last_assessed: self.redundancy.last_assessment,
            },
            saturation: self.saturation_signals.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(entries: &[(&str, u64)]) -> BTreeMap<String, CoverageInput> {
        entries
            .iter()
            .map(|(code, count)| {
                (
                    code.to_string(),
                    CoverageInput {
                        document_count: *count,
                        case_count: 0,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_generation_stabilizes_on_first_crossing() {
        let mut tracking = SaturationTracking::default();
        let now = Utc::now();
        let counts = [3, 2, 1, 0, 0, 0, 0];

        let mut outcomes = Vec::new();
        for (i, n) in counts.iter().enumerate() {
            outcomes.push(tracking.record_document(&format!("INT_{:03}", i + 1), None, *n, now));
        }

        assert!(outcomes[..6].iter().all(|o| !o.stabilized));
        assert_eq!(outcomes[6].stabilized_at.as_deref(), Some("INT_007"));
        assert_eq!(outcomes[6].generation_rate, 0.2);
        assert_eq!(tracking.code_generation.total_codes, 6);

        // Later documents never move the stabilization point
        tracking.record_document("INT_008", None, 9, now);
        tracking.record_document("INT_009", Some("Late interview"), 0, now);
        assert_eq!(tracking.code_generation.stabilized_at_document.as_deref(), Some("INT_007"));
    }

    #[test]
    fn test_generation_needs_three_points() {
        let mut tracking = SaturationTracking::default();
        let now = Utc::now();
        tracking.record_document("a", None, 0, now);
        let second = tracking.record_document("b", None, 0, now);
        assert!(!second.stabilized);
        let third = tracking.record_document("c", None, 0, now);
        assert_eq!(third.stabilized_at.as_deref(), Some("c"));
    }

    #[test]
    fn test_coverage_boundaries() {
        let mut tracking = SaturationTracking::default();
        let outcome = tracking.update_coverage(&coverage(&[("resilience", 16), ("burnout", 17), ("humor", 1)]), 20);

        let by_code = &tracking.code_coverage.coverage_by_code;
        assert_eq!(by_code["resilience"].coverage_percent, 80.0);
        assert_eq!(by_code["burnout"].coverage_percent, 85.0);
        assert_eq!(tracking.code_coverage.universal_codes, vec!["burnout"]);
        assert_eq!(tracking.code_coverage.rare_codes, vec!["humor"]);
        assert_eq!(outcome.total_codes_tracked, 3);
    }

    #[test]
    fn test_coverage_zero_documents_uses_one() {
        let mut tracking = SaturationTracking::default();
        tracking.update_coverage(&coverage(&[("x", 1)]), 0);
        assert_eq!(tracking.code_coverage.coverage_by_code["x"].coverage_percent, 100.0);
    }

    #[test]
    fn test_redundancy_clamped() {
        let mut tracking = SaturationTracking::default();
        let now = Utc::now();

        let high = tracking.update_redundancy(1.5, Some("same stories"), now);
        assert_eq!(high.redundancy_score, 1.0);
        assert!(high.above_threshold);

        let low = tracking.update_redundancy(-0.2, None, now);
        assert_eq!(low.redundancy_score, 0.0);
        assert!(!low.above_threshold);
        assert_eq!(tracking.redundancy.assessment_notes, "");
    }

    #[test]
    fn test_refinement_window_uses_days() {
        let mut tracking = SaturationTracking::default();
        let now = Utc::now();
        tracking.record_refinement("coping", "split", None, None, Some("two mechanisms"), now - Duration::days(9));
        tracking.record_refinement("coping", "redefinition", None, None, None, now - Duration::days(1));
        let outcome = tracking.record_refinement("support", "merge", Some("a"), Some("b"), None, now);

        assert_eq!(outcome.total_refinements, 3);
        assert_eq!(outcome.split_merge_count, 2);
        assert_eq!(outcome.recent_activity, 2);

        // Assessing a week later finds nothing recent
        let later = tracking.assess(now + Duration::days(7));
        assert_eq!(later.metrics.recent_refinements, 0);
    }

    #[test]
    fn test_empty_tracking_scores() {
        let mut tracking = SaturationTracking::default();
        let assessment = tracking.assess(Utc::now());

        // rate 0 is below the stable threshold, no coverage, no refinements, no redundancy
        assert_eq!(assessment.saturation_score, 30 + 25);
        assert_eq!(assessment.saturation_level, SaturationLevel::Approaching);
        assert_eq!(assessment.evidence.coverage_signal, "NO DATA: Coverage not yet tracked");
        assert!(assessment.evidence.code_generation_signal.starts_with("STABLE"));
        assert_eq!(tracking.saturation_signals.overall_level, SaturationLevel::Approaching);
    }

    #[test]
    fn test_full_saturation() {
        let mut tracking = SaturationTracking::default();
        let now = Utc::now();
        for i in 0..5 {
            tracking.record_document(&format!("d{i}"), None, 0, now);
        }
        tracking.update_coverage(&coverage(&[("a", 10), ("b", 8), ("c", 5)]), 20);
        tracking.update_redundancy(0.9, None, now);

        let assessment = tracking.assess(now);
        assert_eq!(assessment.saturation_score, 100);
        assert_eq!(assessment.saturation_level, SaturationLevel::Saturated);
        assert_eq!(assessment.evidence.redundancy_signal, "HIGH: 90% redundancy");
    }

    #[test]
    fn test_partial_signals() {
        let mut tracking = SaturationTracking::default();
        let now = Utc::now();
        tracking.record_document("d1", None, 4, now);
        tracking.update_coverage(&coverage(&[("a", 10), ("b", 1)]), 20);
        tracking.update_redundancy(0.6, None, now);
        for i in 0..3 {
            tracking.record_refinement(&format!("c{i}"), "redefinition", None, None, None, now);
        }

        let assessment = tracking.assess(now);
        // ACTIVE generation 0, DEVELOPING coverage round(0.5 * 15) = 8, ACTIVE refinement 5, EMERGING redundancy 12
        assert_eq!(assessment.saturation_score, 25);
        assert_eq!(assessment.saturation_level, SaturationLevel::Emerging);
        assert_eq!(assessment.evidence.coverage_signal, "DEVELOPING: 50% coverage ratio");
    }

    #[test]
    fn test_coverage_score_rounds_half_to_even() {
        let mut tracking = SaturationTracking::default();
        tracking.update_coverage(
            &coverage(&[("a", 10), ("b", 1), ("c", 1), ("d", 1), ("e", 1), ("f", 1)]),
            20,
        );

        assert_eq!(tracking.coverage_signal(), (2, "DEVELOPING: 17% coverage ratio".to_string()));
        // STABLE generation 30, STABLE refinement 25, no redundancy
        assert_eq!(tracking.assess(Utc::now()).saturation_score, 30 + 2 + 25);
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(SaturationLevel::from_score(90), SaturationLevel::Saturated);
        assert_eq!(SaturationLevel::from_score(89), SaturationLevel::High);
        assert_eq!(SaturationLevel::from_score(70), SaturationLevel::High);
        assert_eq!(SaturationLevel::from_score(50), SaturationLevel::Approaching);
        assert_eq!(SaturationLevel::from_score(25), SaturationLevel::Emerging);
        assert_eq!(SaturationLevel::from_score(24), SaturationLevel::Low);
    }

    #[test]
    fn test_status_reflects_last_assessment() {
        let mut tracking = SaturationTracking::default();
        let now = Utc::now();
        tracking.record_document("d1", None, 2, now);
        tracking.assess(now);

        let status = tracking.status();
        assert_eq!(status.code_generation.documents_tracked, 1);
        assert_eq!(status.saturation.last_assessment, Some(now));
    }
}
