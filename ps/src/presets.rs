//! Methodology presets
//!
//! A preset bundles isolation rule defaults, proactive prompts and stance
//! defaults for one research tradition. Applying a preset only fills gaps:
//! rules the researcher already configured and stance values already set
//! are left alone.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use eyre::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{ProactivePrompts, ProjectState};
use crate::error::RuleError;
use crate::rules::IsolationRule;

/// Top-level key the stance defaults are written under
const STANCE_KEY: &str = "philosophical_stance";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preset {
    pub name: String,
    pub description: String,
    /// Rule key -> defaults
    pub isolation_defaults: BTreeMap<String, IsolationRule>,
    pub proactive_prompts: Vec<String>,
    pub philosophical_defaults: Map<String, Value>,
    pub coding_verbs: Vec<String>,
    pub avoid_verbs: Vec<String>,
    pub key_practices: Vec<String>,
}

/// `{"presets": {"<id>": Preset, ...}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetCatalog {
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
}

impl PresetCatalog {
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        serde_json::from_str(json).map_err(|e| RuleError::InvalidCatalog(e.to_string()))
    }

    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        let content = fs::read_to_string(path).context(format!("Failed to read presets from {}", path.display()))?;
        let catalog = Self::from_json(&content).context(format!("Failed to parse presets in {}", path.display()))?;
        debug!(?path, presets = catalog.presets.len(), "PresetCatalog::from_file: loaded");
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Result<&Preset, RuleError> {
        self.presets
            .get(id)
            .ok_or_else(|| RuleError::UnknownPreset(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }
}

/// What [`apply_preset`] changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetOutcome {
    pub preset: String,
    pub preset_name: String,
    pub description: String,
    /// Rule keys the preset enables
    pub isolation_rules: Vec<String>,
    pub proactive_prompts: usize,
    pub key_practices: Vec<String>,
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

fn verbs(list: &[String]) -> Value {
    Value::Array(list.iter().cloned().map(Value::String).collect())
}

/// Apply preset `id` from `catalog` to the document
pub fn apply_preset(state: &mut ProjectState, catalog: &PresetCatalog, id: &str) -> Result<PresetOutcome, RuleError> {
    debug!(%id, "apply_preset: called");
    let preset = catalog.get(id)?;

    let design = state.research_design_mut();
    design.methodology_preset = Some(id.to_string());

    for (key, defaults) in &preset.isolation_defaults {
        let configured = design.isolation_config.get(key);
        if configured.is_none_or(|rule| rule.enabled.is_none()) {
            design.isolation_config.insert(key.clone(), defaults.clone());
        }
    }

    design
        .proactive_prompts
        .get_or_insert_with(ProactivePrompts::default)
        .active_prompts = preset.proactive_prompts.clone();

    let wants_stance =
        !preset.philosophical_defaults.is_empty() || !preset.coding_verbs.is_empty() || !preset.avoid_verbs.is_empty();
    if wants_stance {
        let stance = state
            .extra
            .entry(STANCE_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match stance.as_object_mut() {
            Some(stance) => {
                for (key, value) in &preset.philosophical_defaults {
                    stance.entry(key.clone()).or_insert_with(|| value.clone());
                }
                if !preset.coding_verbs.is_empty() && is_blank(stance.get("coding_verbs")) {
                    stance.insert("coding_verbs".to_string(), verbs(&preset.coding_verbs));
                }
                if !preset.avoid_verbs.is_empty() && is_blank(stance.get("avoid_verbs")) {
                    stance.insert("avoid_verbs".to_string(), verbs(&preset.avoid_verbs));
                }
            }
            None => debug!("apply_preset: philosophical_stance is not an object, leaving it alone"),
        }
    }

    info!(preset = %id, "Applied methodology preset");
    Ok(PresetOutcome {
        preset: id.to_string(),
        preset_name: preset.name.clone(),
        description: preset.description.clone(),
        isolation_rules: preset
            .isolation_defaults
            .iter()
            .filter(|(_, rule)| rule.is_enabled())
            .map(|(key, _)| key.clone())
            .collect(),
        proactive_prompts: preset.proactive_prompts.len(),
        key_practices: preset.key_practices.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CATALOG: &str = r#"{
        "presets": {
            "gioia_corley": {
                "name": "Gioia & Corley",
                "description": "Inductive concept development from informant terms",
                "isolation_defaults": {
                    "case_isolation": {"enabled": true, "relaxes_at": "phase3_pattern_characterization", "friction_level": "challenge"},
                    "wave_isolation": {"enabled": false},
                    "stream_separation": {"enabled": true, "relaxes_at": "phase2_synthesis", "friction_level": "nudge"}
                },
                "proactive_prompts": ["informant_voice", "second_order_jump"],
                "philosophical_defaults": {"ontology": "interpretivist", "tradition": "gioia_corley"},
                "coding_verbs": ["interpret", "construct"],
                "avoid_verbs": ["discover"],
                "key_practices": ["1st-order concepts in informant terms"]
            }
        }
    }"#;

    fn catalog() -> PresetCatalog {
        PresetCatalog::from_json(CATALOG).unwrap()
    }

    #[test]
    fn test_apply_to_empty_document() {
        let mut state = ProjectState::default();
        let outcome = apply_preset(&mut state, &catalog(), "gioia_corley").unwrap();

        assert_eq!(outcome.preset_name, "Gioia & Corley");
        assert_eq!(outcome.isolation_rules, vec!["case_isolation", "stream_separation"]);
        assert_eq!(outcome.proactive_prompts, 2);

        let design = state.research_design.as_ref().unwrap();
        assert_eq!(design.methodology_preset.as_deref(), Some("gioia_corley"));
        assert_eq!(design.isolation_config.len(), 3);
        let prompts = design.proactive_prompts.as_ref().unwrap();
        assert!(prompts.enabled);
        assert_eq!(prompts.cooldown_turns, 5);
        assert_eq!(prompts.active_prompts, vec!["informant_voice", "second_order_jump"]);

        assert_eq!(
            state.extra[STANCE_KEY],
            json!({
                "ontology": "interpretivist",
                "tradition": "gioia_corley",
                "coding_verbs": ["interpret", "construct"],
                "avoid_verbs": ["discover"]
            })
        );
    }

    #[test]
    fn test_existing_choices_survive() {
        let mut state: ProjectState = serde_json::from_value(json!({
            "research_design": {
                "isolation_config": {
                    "case_isolation": {"enabled": false, "relaxes_at": "stage1_foundation"},
                    "stream_separation": {"relaxes_at": "stage3_synthesis"}
                }
            },
            "philosophical_stance": {"ontology": "critical_realist", "coding_verbs": []}
        }))
        .unwrap();

        apply_preset(&mut state, &catalog(), "gioia_corley").unwrap();

        let config = &state.research_design.as_ref().unwrap().isolation_config;
        assert_eq!(config["case_isolation"].enabled, Some(false));
        assert_eq!(config["case_isolation"].relaxes_at.as_deref(), Some("stage1_foundation"));
        // No explicit enabled flag, so the preset takes over
        assert_eq!(config["stream_separation"].relaxes_at.as_deref(), Some("phase2_synthesis"));

        let stance = &state.extra[STANCE_KEY];
        assert_eq!(stance["ontology"], json!("critical_realist"));
        assert_eq!(stance["coding_verbs"], json!(["interpret", "construct"]));
    }

    #[test]
    fn test_unknown_preset() {
        let mut state = ProjectState::default();
        assert_eq!(
            apply_preset(&mut state, &catalog(), "grounded_theory"),
            Err(RuleError::UnknownPreset("grounded_theory".to_string()))
        );
        assert!(state.research_design.is_none());
    }

    #[test]
    fn test_invalid_catalog() {
        assert!(matches!(
            PresetCatalog::from_json("{\"presets\": []}"),
            Err(RuleError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("methodology-presets.json");
        fs::write(&path, CATALOG).unwrap();

        let catalog = PresetCatalog::from_file(&path).unwrap();
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["gioia_corley"]);
    }
}
