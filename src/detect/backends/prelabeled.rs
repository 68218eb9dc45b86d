use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::{Detection, OverlayConfig};
use crate::frame::{Frame, FramePayload};

/// Backend for frames whose detections were produced upstream.
///
/// This is the direct-detection adapter: replay files and the synthetic scene
/// source hand over typed records, so the backend only applies the
/// confidence threshold.
#[derive(Default)]
pub struct PrelabeledBackend {
    frames_seen: u64,
}

impl PrelabeledBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectorBackend for PrelabeledBackend {
    fn name(&self) -> &'static str {
        "prelabeled"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::Classification
                | DetectionCapability::Confidence
                | DetectionCapability::Localization
        )
    }

    fn detect(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
        overlay: &OverlayConfig,
    ) -> Result<Vec<Detection>> {
        let FramePayload::Prelabeled(detections) = frame.payload() else {
            return Err(anyhow!(
                "prelabeled backend cannot decode text frame #{}",
                frame.index()
            ));
        };
        self.frames_seen += 1;
        if self.frames_seen == 1 {
            log::debug!("prelabeled backend: overlay={} (not drawn)", overlay);
        }
        Ok(detections
            .iter()
            .filter(|det| det.confidence() >= min_confidence)
            .cloned()
            .collect())
    }
}
