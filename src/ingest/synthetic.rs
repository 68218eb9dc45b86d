//! Synthetic scene source (`stub://NAME`).
//!
//! Produces prelabeled frames with a seeded RNG: zero to five people, now and
//! then a cell phone, and helmets on some of the people. Same seed, same scenes.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::detect::{BoundingBox, Detection};
use crate::frame::{Capture, Frame, FrameSource, SourceStats};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Source URL, e.g. "stub://yard".
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    /// Close the source after this many frames; `None` runs until interrupted.
    pub frame_limit: Option<u64>,
    /// Pause before each frame, emulating the camera frame rate.
    pub frame_interval: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://synthetic".to_string(),
            width: 640,
            height: 480,
            seed: 0,
            frame_limit: None,
            frame_interval: Duration::from_millis(100),
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        log::info!(
            "SyntheticSource: {} (seed {}, {}x{})",
            config.name,
            config.seed,
            config.width,
            config.height
        );
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            frame_count: 0,
        }
    }

    fn exhausted(&self) -> bool {
        self.config
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
    }

    fn random_box(&mut self, max_w: f64, max_h: f64) -> Result<BoundingBox> {
        let width = f64::from(self.config.width.max(2));
        let height = f64::from(self.config.height.max(2));
        let w = self.rng.gen_range(1.0..max_w.min(width).max(2.0));
        let h = self.rng.gen_range(1.0..max_h.min(height).max(2.0));
        let left = self.rng.gen_range(0.0..=(width - w));
        let top = self.rng.gen_range(0.0..=(height - h));
        BoundingBox::new(left, top, left + w, top + h)
    }

    fn generate_scene(&mut self) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();
        let people = self.rng.gen_range(0..=5);
        for _ in 0..people {
            let bbox = self.random_box(120.0, 260.0)?;
            let confidence = self.rng.gen_range(0.3..1.0);
            detections.push(Detection::new("person", confidence, bbox)?);

            if self.rng.gen_bool(0.6) {
                let helmet = self.random_box(40.0, 30.0)?;
                detections.push(Detection::new("helmet", self.rng.gen_range(0.4..1.0), helmet)?);
            }
        }
        if self.rng.gen_bool(0.1) {
            let bbox = self.random_box(30.0, 50.0)?;
            detections.push(Detection::new("cell phone", self.rng.gen_range(0.4..1.0), bbox)?);
        }
        Ok(detections)
    }
}

impl FrameSource for SyntheticSource {
    fn is_streaming(&self) -> bool {
        !self.exhausted()
    }

    fn capture(&mut self) -> Result<Capture> {
        if self.exhausted() {
            return Ok(Capture::Closed);
        }
        if !self.config.frame_interval.is_zero() {
            std::thread::sleep(self.config.frame_interval);
        }
        let detections = self.generate_scene()?;
        self.frame_count += 1;
        Ok(Capture::Frame(Frame::prelabeled(
            self.frame_count,
            self.config.width,
            self.config.height,
            detections,
        )))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            timeouts: 0,
            source: self.config.name.clone(),
        }
    }
}
