//! Per-frame reduction of detections into class counts and centroids.

use std::collections::BTreeMap;
use std::fmt;

use crate::detect::{Centroid, Detection};
use crate::labels::LabelPolicy;

/// Counts and centroids for one frame.
///
/// Built fresh for every frame and discarded after rule evaluation; summaries
/// are never merged. `count(label) == centroids(label).len()` holds for every label.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameSummary {
    centroids: BTreeMap<String, Vec<Centroid>>,
}

impl FrameSummary {
    pub fn count(&self, label: &str) -> usize {
        self.centroids.get(label).map_or(0, Vec::len)
    }

    pub fn centroids(&self, label: &str) -> &[Centroid] {
        self.centroids
            .get(label)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Label -> count for every label seen in the frame.
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        self.centroids
            .iter()
            .map(|(label, points)| (label.as_str(), points.len()))
            .collect()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.centroids.keys().map(String::as_str)
    }

    /// Total number of detections summarized.
    pub fn total(&self) -> usize {
        self.centroids.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    fn push(&mut self, label: String, centroid: Centroid) {
        self.centroids.entry(label).or_default().push(centroid);
    }
}

impl fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (label, points)) in self.centroids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", label, points.len())?;
        }
        f.write_str("}")
    }
}

/// Reduces a frame's detections into a `FrameSummary`.
#[derive(Clone, Debug, Default)]
pub struct FrameSummarizer {
    labels: LabelPolicy,
}

impl FrameSummarizer {
    pub fn new(labels: LabelPolicy) -> Self {
        Self { labels }
    }

    pub fn label_policy(&self) -> &LabelPolicy {
        &self.labels
    }

    pub fn summarize(&self, detections: &[Detection]) -> FrameSummary {
        let mut summary = FrameSummary::default();
        for det in detections {
            summary.push(self.labels.resolve(det.label()), det.centroid());
        }
        summary
    }
}
