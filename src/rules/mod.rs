//! Declarative policy rules and their evaluation against one frame summary.
//!
//! Rules are validated once when they are built; evaluation cannot fail.
//! Every rule is checked on every frame and rules fire independently, in
//! definition order.

use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashSet};

use crate::detect::{Centroid, DetectionCapability, DetectorBackend};
use crate::summary::FrameSummary;

mod file;

pub use file::{load_rule_file, parse_rule_document, RuleFormat, RuleSet};

/// Rule type with its parameters. Class names are already label-resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleKind {
    /// Fires when `count(class) > threshold`.
    CountOver { class: String, threshold: f64 },
    /// Fires when `class` appears at all.
    ForbidClass { class: String },
    /// Fires when `trigger` appears but one of `required` does not.
    RequireTogether {
        trigger: String,
        required: Vec<String>,
    },
    /// Fires when two `class` centroids are closer than `pixels`.
    MinDistance { class: String, pixels: f64 },
}

impl RuleKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::CountOver { .. } => "count_over",
            RuleKind::ForbidClass { .. } => "forbid_class",
            RuleKind::RequireTogether { .. } => "require_together",
            RuleKind::MinDistance { .. } => "min_distance",
        }
    }

    /// Class names this rule looks at.
    pub fn classes(&self) -> Vec<&str> {
        match self {
            RuleKind::CountOver { class, .. }
            | RuleKind::ForbidClass { class }
            | RuleKind::MinDistance { class, .. } => vec![class.as_str()],
            RuleKind::RequireTogether { trigger, required } => std::iter::once(trigger)
                .chain(required)
                .map(String::as_str)
                .collect(),
        }
    }

    /// Capabilities the detector must offer for this rule to be meaningful.
    pub fn required_capability(&self) -> Option<DetectionCapability> {
        match self {
            RuleKind::MinDistance { .. } => Some(DetectionCapability::Localization),
            _ => None,
        }
    }
}

/// One anomaly raised by one rule on one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnomalyEvent {
    pub rule_id: String,
    pub details: String,
}

impl AnomalyEvent {
    pub fn new(rule_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            details: details.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    id: String,
    kind: RuleKind,
}

impl Rule {
    pub fn new(id: impl Into<String>, kind: RuleKind) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(anyhow!("rule id must not be empty"));
        }
        validate_kind(&id, &kind)?;
        Ok(Self { id, kind })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    pub fn evaluate(&self, summary: &FrameSummary) -> Option<AnomalyEvent> {
        let details = match &self.kind {
            RuleKind::CountOver { class, threshold } => {
                let count = summary.count(class);
                if (count as f64) <= *threshold {
                    return None;
                }
                format!("{}={}>{}", class, count, threshold)
            }
            RuleKind::ForbidClass { class } => {
                let count = summary.count(class);
                if count == 0 {
                    return None;
                }
                format!("forbidden {} seen ({})", class, count)
            }
            RuleKind::RequireTogether { trigger, required } => {
                if summary.count(trigger) == 0
                    || required.iter().all(|class| summary.count(class) > 0)
                {
                    return None;
                }
                let mut listed = Vec::with_capacity(required.len() + 1);
                listed.push(trigger.as_str());
                listed.extend(required.iter().map(String::as_str));
                format!("missing combo {}", format_class_list(&listed))
            }
            RuleKind::MinDistance { class, pixels } => {
                let points = summary.centroids(class);
                if points.len() < 2 {
                    return None;
                }
                let closest = min_pairwise_distance(points);
                if closest >= *pixels {
                    return None;
                }
                format!("{} too close: {:.1}px < {}px", class, closest, pixels)
            }
        };
        Some(AnomalyEvent::new(self.id.clone(), details))
    }
}

fn validate_kind(id: &str, kind: &RuleKind) -> Result<()> {
    let check_class = |class: &str| {
        if class.trim().is_empty() {
            Err(anyhow!("rule '{}': class name must not be empty", id))
        } else {
            Ok(())
        }
    };
    match kind {
        RuleKind::CountOver { class, threshold } => {
            check_class(class)?;
            if !threshold.is_finite() || *threshold < 0.0 {
                return Err(anyhow!(
                    "rule '{}': threshold must be a non-negative number",
                    id
                ));
            }
        }
        RuleKind::ForbidClass { class } => check_class(class)?,
        RuleKind::RequireTogether { trigger, required } => {
            check_class(trigger)?;
            if required.is_empty() {
                return Err(anyhow!(
                    "rule '{}': require_together needs at least 2 classes",
                    id
                ));
            }
            for class in required {
                check_class(class)?;
            }
        }
        RuleKind::MinDistance { class, pixels } => {
            check_class(class)?;
            if !pixels.is_finite() || *pixels <= 0.0 {
                return Err(anyhow!("rule '{}': pixels must be a positive number", id));
            }
        }
    }
    Ok(())
}

/// Minimum Euclidean distance over all unordered pairs; infinite below two points.
pub fn min_pairwise_distance(points: &[Centroid]) -> f64 {
    let mut closest = f64::INFINITY;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            closest = closest.min(a.distance_to(b));
        }
    }
    closest
}

/// `['person', 'helmet']`
fn format_class_list(classes: &[&str]) -> String {
    let quoted: Vec<String> = classes
        .iter()
        .map(|class| {
            if class.contains('\'') && !class.contains('"') {
                format!("\"{}\"", class)
            } else {
                format!("'{}'", class.replace('\'', "\\'"))
            }
        })
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// Fixed, validated set of rules.
#[derive(Clone, Debug, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id()) {
                return Err(anyhow!("duplicate rule id '{}'", rule.id()));
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every class referenced by a rule.
    pub fn classes(&self) -> BTreeSet<&str> {
        self.rules
            .iter()
            .flat_map(|rule| rule.kind().classes())
            .collect()
    }

    /// Events for one frame, in rule definition order.
    pub fn evaluate(&self, summary: &FrameSummary) -> Vec<AnomalyEvent> {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(summary))
            .collect()
    }

    /// Fails when a rule needs a capability the detector does not offer.
    pub fn ensure_supported_by(&self, detector: &dyn DetectorBackend) -> Result<()> {
        for rule in &self.rules {
            if let Some(capability) = rule.kind().required_capability() {
                if !detector.supports(capability) {
                    return Err(anyhow!(
                        "rule '{}' ({}) needs {:?}, which detector '{}' does not provide",
                        rule.id(),
                        rule.kind().type_name(),
                        capability,
                        detector.name()
                    ));
                }
            }
        }
        Ok(())
    }
}
