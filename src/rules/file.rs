use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::{Rule, RuleEngine, RuleKind};
use crate::labels::LabelPolicy;

/// Rule document syntax, chosen by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleFormat {
    Yaml,
    Json,
    Toml,
}

impl RuleFormat {
    /// `.json` and `.toml` are recognized; anything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => RuleFormat::Json,
            Some("toml") => RuleFormat::Toml,
            _ => RuleFormat::Yaml,
        }
    }
}

/// Rules plus the label policy they were resolved with.
#[derive(Clone, Debug)]
pub struct RuleSet {
    pub engine: RuleEngine,
    pub labels: LabelPolicy,
}

#[derive(Debug, Deserialize, Default)]
struct RuleDocument {
    rules: Option<Vec<RuleEntry>>,
    labels: Option<LabelSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LabelSection {
    case_insensitive: Option<bool>,
    #[serde(default)]
    synonyms: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleEntry {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    class: Option<String>,
    threshold: Option<f64>,
    pixels: Option<f64>,
    require: Option<Vec<String>>,
    trigger: Option<String>,
    required: Option<Vec<String>>,
}

impl RuleEntry {
    fn present_keys(&self) -> Vec<&'static str> {
        [
            ("class", self.class.is_some()),
            ("threshold", self.threshold.is_some()),
            ("pixels", self.pixels.is_some()),
            ("require", self.require.is_some()),
            ("trigger", self.trigger.is_some()),
            ("required", self.required.is_some()),
        ]
        .iter()
        .filter(|(_, present)| *present)
        .map(|(key, _)| *key)
        .collect()
    }

    fn into_rule(self, position: usize, labels: &LabelPolicy) -> Result<Rule> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| anyhow!("rule #{}: missing `id`", position))?;
        let kind = self
            .kind
            .clone()
            .ok_or_else(|| anyhow!("rule '{}': missing `type`", id))?;

        let allowed: &[&str] = match kind.as_str() {
            "count_over" => &["class", "threshold"],
            "forbid_class" => &["class"],
            "require_together" => &["require", "trigger", "required"],
            "min_distance" => &["class", "pixels"],
            other => return Err(anyhow!("rule '{}': unknown rule type '{}'", id, other)),
        };
        if let Some(extra) = self
            .present_keys()
            .into_iter()
            .find(|key| !allowed.contains(key))
        {
            return Err(anyhow!(
                "rule '{}': `{}` is not a parameter of {}",
                id,
                extra,
                kind
            ));
        }

        let missing = |key: &str| anyhow!("rule '{}': {} requires `{}`", id, kind, key);
        let class = || {
            self.class
                .as_deref()
                .map(|class| labels.resolve(class))
                .ok_or_else(|| missing("class"))
        };

        let rule_kind = match kind.as_str() {
            "count_over" => RuleKind::CountOver {
                class: class()?,
                threshold: self.threshold.ok_or_else(|| missing("threshold"))?,
            },
            "forbid_class" => RuleKind::ForbidClass { class: class()? },
            "min_distance" => RuleKind::MinDistance {
                class: class()?,
                pixels: self.pixels.ok_or_else(|| missing("pixels"))?,
            },
            _ => {
                let (trigger, required) = match (&self.require, &self.trigger, &self.required) {
                    (Some(list), None, None) => {
                        let Some((first, rest)) = list.split_first() else {
                            return Err(anyhow!(
                                "rule '{}': require_together needs at least 2 classes",
                                id
                            ));
                        };
                        (first.clone(), rest.to_vec())
                    }
                    (None, Some(trigger), Some(required)) => (trigger.clone(), required.clone()),
                    (None, Some(_), None) => return Err(missing("required")),
                    (None, None, Some(_)) => return Err(missing("trigger")),
                    (None, None, None) => return Err(missing("require")),
                    _ => {
                        return Err(anyhow!(
                            "rule '{}': use either `require` or `trigger`/`required`, not both",
                            id
                        ))
                    }
                };
                RuleKind::RequireTogether {
                    trigger: labels.resolve(&trigger),
                    required: required.iter().map(|class| labels.resolve(class)).collect(),
                }
            }
        };
        Rule::new(id, rule_kind)
    }
}

/// Parse and validate a rule document.
pub fn parse_rule_document(raw: &str, format: RuleFormat) -> Result<RuleSet> {
    let doc: RuleDocument = match format {
        RuleFormat::Yaml => {
            if raw.trim().is_empty() {
                RuleDocument::default()
            } else {
                serde_yaml::from_str(raw).map_err(|e| anyhow!("invalid YAML: {}", e))?
            }
        }
        RuleFormat::Json => serde_json::from_str(raw).map_err(|e| anyhow!("invalid JSON: {}", e))?,
        RuleFormat::Toml => toml::from_str(raw).map_err(|e| anyhow!("invalid TOML: {}", e))?,
    };

    let labels = match doc.labels {
        Some(section) => LabelPolicy::new(
            section.case_insensitive.unwrap_or(true),
            section.synonyms,
        )?,
        None => LabelPolicy::default(),
    };

    let entries = doc
        .rules
        .ok_or_else(|| anyhow!("rule document has no `rules` list"))?;
    let rules = entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| entry.into_rule(i + 1, &labels))
        .collect::<Result<Vec<_>>>()?;
    let engine = RuleEngine::new(rules)?;
    if engine.is_empty() {
        log::warn!("rule document defines no rules; nothing will be flagged");
    }
    Ok(RuleSet { engine, labels })
}

/// Load rules from disk. Any failure here is a startup configuration error.
pub fn load_rule_file(path: &Path) -> Result<RuleSet> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rule file {}", path.display()))?;
    parse_rule_document(&raw, RuleFormat::from_path(path))
        .with_context(|| format!("invalid rule file {}", path.display()))
}
