use anyhow::{anyhow, Result};

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    /// Requires finite coordinates with `left < right` and `top < bottom`.
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Result<Self> {
        if ![left, top, right, bottom].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("bounding box coordinates must be finite"));
        }
        if left >= right || top >= bottom {
            return Err(anyhow!(
                "invalid bounding box ({}, {}, {}, {}): expected left<right and top<bottom",
                left,
                top,
                right,
                bottom
            ));
        }
        Ok(Self {
            left,
            top,
            right,
            bottom,
        })
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn centroid(&self) -> Centroid {
        Centroid {
            x: (self.left + self.right) / 2.0,
            y: (self.top + self.bottom) / 2.0,
        }
    }
}

/// Midpoint of a detection's bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
}

impl Centroid {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Centroid) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// One detected object instance in a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    label: String,
    confidence: f32,
    bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Result<Self> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(anyhow!("detection label must not be empty"));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!(
                "detection confidence {} for '{}' outside 0.0..=1.0",
                confidence,
                label
            ));
        }
        Ok(Self {
            label,
            confidence,
            bbox,
        })
    }

    /// Raw label as reported by the detector (before label resolution).
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn centroid(&self) -> Centroid {
        self.bbox.centroid()
    }
}
