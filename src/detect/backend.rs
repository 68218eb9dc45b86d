use anyhow::Result;

use crate::detect::{Detection, OverlayConfig};
use crate::frame::Frame;

/// Detection capabilities supported by backends.
///
/// Rules that depend on a capability (e.g. `min_distance` needs real boxes)
/// are rejected at startup when the selected backend lacks it.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Reports a class label per object.
    Classification,
    /// Reports a per-object confidence score.
    Confidence,
    /// Reports a real bounding box per object.
    Localization,
}

/// Detector backend trait.
///
/// Every backend produces the same `Detection` shape so that summarization and
/// rule evaluation are written once, whatever the upstream perception stack.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame.
    ///
    /// Detections below `min_confidence` are dropped. `overlay` selects what the
    /// backend draws onto the frame, if it draws at all.
    fn detect(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
        overlay: &OverlayConfig,
    ) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
