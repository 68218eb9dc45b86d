//! Headless render sink.

use anyhow::Result;

use crate::frame::{Frame, FrameSink};

/// Render collaborator for sessions without a display.
///
/// Frames are not drawn anywhere; banners and status changes go to the log.
#[derive(Debug, Default)]
pub struct LogSink {
    frames_rendered: u64,
    banners_shown: u64,
    status: String,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn banners_shown(&self) -> u64 {
        self.banners_shown
    }

    pub fn last_status(&self) -> &str {
        &self.status
    }
}

impl FrameSink for LogSink {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.frames_rendered += 1;
        if let Some(banner) = frame.banner() {
            self.banners_shown += 1;
            log::debug!("frame #{}: {}", frame.index(), banner);
        }
        Ok(())
    }

    fn set_status(&mut self, status: &str) {
        if status != self.status {
            log::debug!("status: {}", status);
            self.status = status.to_string();
        }
    }
}
