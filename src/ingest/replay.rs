//! JSON-lines replay source.
//!
//! One line per capture attempt:
//!
//! ```text
//! {"width":640,"height":480,"detections":[{"class":"person","confidence":0.9,"bbox":{"left":10,"top":20,"right":60,"bottom":140}}]}
//! {"timeout":true}
//! ```
//!
//! Blank lines are skipped. End of file closes the source.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::detect::{BoundingBox, Detection};
use crate::frame::{Capture, Frame, FrameSource, SourceStats};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplayLine {
    #[serde(default)]
    timeout: bool,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    detections: Vec<ReplayDetection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplayDetection {
    class: String,
    confidence: Option<f32>,
    bbox: ReplayBox,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplayBox {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

/// Frames replayed from a recorded session file.
pub struct ReplaySource {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
    frames_captured: u64,
    timeouts: u64,
    finished: bool,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        log::info!("ReplaySource: reading {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
            frames_captured: 0,
            timeouts: 0,
            finished: false,
        })
    }

    fn parse_line(&self, raw: &str) -> Result<Option<Frame>> {
        let line: ReplayLine = serde_json::from_str(raw).map_err(|e| {
            anyhow!("{}:{}: invalid replay line: {}", self.path.display(), self.line_no, e)
        })?;
        if line.timeout {
            return Ok(None);
        }
        let detections = line
            .detections
            .into_iter()
            .map(|d| {
                let bbox = BoundingBox::new(d.bbox.left, d.bbox.top, d.bbox.right, d.bbox.bottom)?;
                Detection::new(d.class, d.confidence.unwrap_or(1.0), bbox)
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("{}:{}", self.path.display(), self.line_no))?;
        Ok(Some(Frame::prelabeled(
            self.frames_captured + 1,
            line.width.unwrap_or(DEFAULT_WIDTH),
            line.height.unwrap_or(DEFAULT_HEIGHT),
            detections,
        )))
    }
}

impl FrameSource for ReplaySource {
    fn is_streaming(&self) -> bool {
        !self.finished
    }

    fn capture(&mut self) -> Result<Capture> {
        loop {
            let Some(line) = self.lines.next() else {
                self.finished = true;
                return Ok(Capture::Closed);
            };
            self.line_no += 1;
            let line = line
                .with_context(|| format!("failed to read replay file {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            return match self.parse_line(&line)? {
                Some(frame) => {
                    self.frames_captured += 1;
                    Ok(Capture::Frame(frame))
                }
                None => {
                    self.timeouts += 1;
                    Ok(Capture::Timeout)
                }
            };
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            timeouts: self.timeouts,
            source: self.path.display().to_string(),
        }
    }
}
