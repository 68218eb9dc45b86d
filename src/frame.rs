//! Frame handle and the capture/render collaborator traits.
//!
//! - `Frame`: one captured frame, owned by the monitor for a single iteration.
//! - `FrameSource`: produces frames (or liveness timeouts) from a camera, file or process.
//! - `FrameSink`: receives the frame after evaluation for display or recording.
//!
//! Frames carry whatever the source collected for the detector: structured
//! detections from a direct adapter, or raw text lines from the stdout adapter.
//! Nothing in a `Frame` survives past the iteration that captured it.

use anyhow::Result;

use crate::detect::Detection;

/// Detector input carried by a frame.
#[derive(Clone, Debug)]
pub enum FramePayload {
    /// Detections already produced upstream (replay files, synthetic scenes).
    Prelabeled(Vec<Detection>),
    /// Unstructured detector output lines belonging to this frame.
    Text(Vec<String>),
}

/// One captured frame.
#[derive(Clone, Debug)]
pub struct Frame {
    index: u64,
    pub width: u32,
    pub height: u32,
    payload: FramePayload,
    banner: Option<String>,
}

impl Frame {
    pub fn prelabeled(index: u64, width: u32, height: u32, detections: Vec<Detection>) -> Self {
        Self {
            index,
            width,
            height,
            payload: FramePayload::Prelabeled(detections),
            banner: None,
        }
    }

    pub fn text(index: u64, width: u32, height: u32, lines: Vec<String>) -> Self {
        Self {
            index,
            width,
            height,
            payload: FramePayload::Text(lines),
            banner: None,
        }
    }

    /// Sequence number assigned by the source (1-based).
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    /// Alert banner drawn over the frame before rendering.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn set_banner(&mut self, text: impl Into<String>) {
        self.banner = Some(text.into());
    }
}

/// Outcome of one capture attempt.
#[derive(Debug)]
pub enum Capture {
    Frame(Frame),
    /// No frame arrived within the source's capture timeout. A liveness condition, not an error.
    Timeout,
    /// The source has no more frames.
    Closed,
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub timeouts: u64,
    pub source: String,
}

/// Capture collaborator.
pub trait FrameSource {
    /// Returns false once the source has ended or failed permanently.
    fn is_streaming(&self) -> bool;

    /// Wait for the next frame. May block up to the source's capture timeout.
    fn capture(&mut self) -> Result<Capture>;

    fn stats(&self) -> SourceStats;
}

/// Render collaborator.
pub trait FrameSink {
    fn is_streaming(&self) -> bool {
        true
    }

    fn render(&mut self, frame: &Frame) -> Result<()>;

    fn set_status(&mut self, _status: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_is_set_once_per_frame() {
        let mut frame = Frame::text(3, 640, 480, vec!["detected person".to_string()]);
        assert_eq!(frame.index(), 3);
        assert!(frame.banner().is_none());
        frame.set_banner("ANOMALY: max_people");
        assert_eq!(frame.banner(), Some("ANOMALY: max_people"));
        assert!(matches!(frame.payload(), FramePayload::Text(lines) if lines.len() == 1));
    }
}
