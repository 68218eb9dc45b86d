//! Adapter for detectnet-style console output.
//!
//! Limitations:
//! - Labels come from `class #N (label)` when the line carries one, otherwise
//!   from coarse substring/synonym patterns. Lines matching no pattern are dropped.
//! - Confidence comes from `confidence=0.87` when present, otherwise 1.0.
//! - Boxes come from the `bounding box N (x1, y1) (x2, y2)` line detectnet prints
//!   right after each object. A localizing backend drops detections whose box line
//!   is missing or malformed; a non-localizing one gives every detection a
//!   frame-sized placeholder box and does not advertise `Localization`.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::{BoundingBox, Detection, OverlayConfig};
use crate::frame::{Frame, FramePayload};
use crate::labels::LabelPolicy;

const BUFFER_TIMEOUT_MARKER: &str = "next image buffer";

/// Returns the announced object count if `line` opens a new frame.
///
/// Both `"3 objects detected"` and detectnet's `"detected 3 objects in image"` count.
pub(crate) fn frame_header_count(line: &str) -> Option<usize> {
    static HEADER_RE: OnceLock<Regex> = OnceLock::new();
    let re = HEADER_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:(\d+)\s+objects?\s+detected|detected\s+(\d+)\s+objects?)\b")
            .unwrap()
    });
    re.captures(line)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .and_then(|m| m.as_str().parse().ok())
}

/// True for the capture-timeout notice detectnet prints while the camera is silent.
pub(crate) fn is_buffer_timeout(line: &str) -> bool {
    line.to_ascii_lowercase().contains(BUFFER_TIMEOUT_MARKER)
}

/// True for lines that report one detected object.
pub(crate) fn is_detection_line(line: &str) -> bool {
    frame_header_count(line).is_none() && line.to_ascii_lowercase().contains("detected")
}

/// True for detectnet's `bounding box N (x1, y1) (x2, y2)` lines.
pub(crate) fn is_box_line(line: &str) -> bool {
    box_captures(line).is_some()
}

fn box_captures(line: &str) -> Option<regex::Captures<'_>> {
    static BOX_RE: OnceLock<Regex> = OnceLock::new();
    let re = BOX_RE.get_or_init(|| {
        let num = r"(-?[0-9]*\.?[0-9]+)";
        let point = format!(r"\(\s*{num}\s*,\s*{num}\s*\)");
        Regex::new(&format!(r"(?i)^\s*bounding\s+box\s+(\d+)\s*{point}\s*{point}")).unwrap()
    });
    re.captures(line)
}

/// Object index and box corners from a box line.
fn parse_box_line(line: &str) -> Option<(usize, [f64; 4])> {
    let caps = box_captures(line)?;
    let index = caps.get(1)?.as_str().parse().ok()?;
    let mut corners = [0.0; 4];
    for (slot, group) in corners.iter_mut().zip(2..=5) {
        *slot = caps.get(group)?.as_str().parse().ok()?;
    }
    Some((index, corners))
}

fn object_index(line: &str) -> Option<usize> {
    static OBJ_RE: OnceLock<Regex> = OnceLock::new();
    let re = OBJ_RE.get_or_init(|| Regex::new(r"(?i)detected\s+obj\s+(\d+)").unwrap());
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn explicit_class(line: &str) -> Option<&str> {
    static CLASS_RE: OnceLock<Regex> = OnceLock::new();
    let re = CLASS_RE.get_or_init(|| Regex::new(r"class\s*#\d+\s*\(([^)]+)\)").unwrap());
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|label| !label.is_empty())
}

fn explicit_confidence(line: &str) -> Option<f32> {
    static CONF_RE: OnceLock<Regex> = OnceLock::new();
    let re = CONF_RE
        .get_or_init(|| Regex::new(r"(?i)confidence\s*[=:]\s*([0-9]*\.?[0-9]+)").unwrap());
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map(|conf| conf.clamp(0.0, 1.0))
}

/// Parses detectnet console lines into detections.
pub struct TextBackend {
    classes: Vec<(String, Regex)>,
    localized: bool,
}

impl TextBackend {
    /// Backend with the stock person / cell phone synonym patterns.
    pub fn new() -> Self {
        let mut backend = Self::empty();
        backend
            .classes
            .push(("person".to_string(), default_pattern(r"person|people|man|woman")));
        backend.classes.push((
            "cell phone".to_string(),
            default_pattern(r"cell\s*phone|cellphone|mobile\s*phone|phone"),
        ));
        backend
    }

    /// Backend with no fallback patterns; only `class #N (label)` lines are recognized.
    pub fn empty() -> Self {
        Self {
            classes: Vec::new(),
            localized: false,
        }
    }

    /// Stock patterns preceded by one pattern per rule class, each matching the
    /// class name and its configured synonyms.
    pub fn with_vocabulary<'a, I>(labels: &LabelPolicy, classes: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let stock = Self::new();
        let mut backend = Self::empty();
        let classes: BTreeSet<String> = classes
            .into_iter()
            .map(|class| labels.resolve(class))
            .collect();
        for class in &classes {
            let mut names = labels.aliases_of(class);
            names.push(class.clone());
            names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            names.dedup();
            let pattern = names
                .iter()
                .map(|name| regex::escape(name).replace(' ', r"\s*"))
                .collect::<Vec<_>>()
                .join("|");
            backend = backend.with_class(class, &pattern)?;
        }
        backend.classes.extend(stock.classes);
        Ok(backend)
    }

    /// Read box lines and advertise `Localization`.
    pub fn localized(mut self, localized: bool) -> Self {
        self.localized = localized;
        self
    }

    /// Add a fallback pattern. Patterns are tried in insertion order.
    pub fn with_class(mut self, label: &str, pattern: &str) -> Result<Self> {
        let re = Regex::new(&format!(r"(?i)\b({})\b", pattern))
            .map_err(|e| anyhow!("invalid pattern for class '{}': {}", label, e))?;
        self.classes.push((label.to_string(), re));
        Ok(self)
    }

    fn classify(&self, line: &str) -> Option<String> {
        if let Some(label) = explicit_class(line) {
            return Some(label.to_string());
        }
        self.classes
            .iter()
            .find(|(_, re)| re.is_match(line))
            .map(|(label, _)| label.clone())
    }
}

impl Default for TextBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn default_pattern(alternatives: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b({})\b", alternatives)).unwrap()
}

/// Box for `detection` from the line that follows it, when the object indices agree.
fn box_after(detection: &str, next: Option<&String>) -> Option<BoundingBox> {
    let (index, [x1, y1, x2, y2]) = parse_box_line(next?)?;
    if object_index(detection).is_some_and(|obj| obj != index) {
        return None;
    }
    BoundingBox::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)).ok()
}

impl DetectorBackend for TextBackend {
    fn name(&self) -> &'static str {
        "detectnet-text"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        match capability {
            DetectionCapability::Classification | DetectionCapability::Confidence => true,
            DetectionCapability::Localization => self.localized,
        }
    }

    fn detect(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
        _overlay: &OverlayConfig,
    ) -> Result<Vec<Detection>> {
        let FramePayload::Text(lines) = frame.payload() else {
            return Err(anyhow!(
                "text backend expects detector output lines (frame #{})",
                frame.index()
            ));
        };
        let placeholder = BoundingBox::new(
            0.0,
            0.0,
            f64::from(frame.width.max(1)),
            f64::from(frame.height.max(1)),
        )?;

        let mut detections = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if !is_detection_line(line) {
                continue;
            }
            let Some(label) = self.classify(line) else {
                log::trace!("text backend: no class recognized in '{}'", line);
                continue;
            };
            let confidence = explicit_confidence(line).unwrap_or(1.0);
            if confidence < min_confidence {
                continue;
            }
            let bbox = if self.localized {
                match box_after(line, lines.get(i + 1)) {
                    Some(bbox) => bbox,
                    None => {
                        log::debug!(
                            "text backend: frame #{}: no usable bounding box for '{}'",
                            frame.index(),
                            line
                        );
                        continue;
                    }
                }
            } else {
                placeholder
            };
            detections.push(Detection::new(label, confidence, bbox)?);
        }
        Ok(detections)
    }
}
