//! Frame sources.
//!
//! The `--camera` value picks the source:
//! - `stub://NAME`: seeded synthetic scenes (testing, demos)
//! - `*.jsonl` or `replay:PATH`: a recorded session
//! - `-`: detector console output piped on stdin
//! - anything else: a camera id handed to a spawned detector process
//!
//! Synthetic and replay sources carry prelabeled detections; the other two carry
//! raw detector output for the text backend. A spawned detector always prints
//! box lines; stdin output is read with boxes only when asked to.

pub mod replay;
pub mod synthetic;
pub mod text;

pub use replay::ReplaySource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
pub use text::{TextConfig, TextSource};

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use crate::detect::{DetectorBackend, OverlayConfig, PrelabeledBackend, TextBackend};
use crate::frame::FrameSource;
use crate::rules::RuleSet;

/// Where frames come from, parsed from the camera argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Synthetic(String),
    Replay(PathBuf),
    Stdin,
    Camera(String),
}

impl SourceSpec {
    pub fn parse(camera: &str) -> Result<Self> {
        let camera = camera.trim();
        if camera.is_empty() {
            return Err(anyhow!("camera must not be empty"));
        }
        if camera.starts_with("stub://") {
            return Ok(SourceSpec::Synthetic(camera.to_string()));
        }
        if let Some(path) = camera.strip_prefix("replay:") {
            if path.is_empty() {
                return Err(anyhow!("replay: needs a file path"));
            }
            return Ok(SourceSpec::Replay(PathBuf::from(path)));
        }
        if camera.to_ascii_lowercase().ends_with(".jsonl") {
            return Ok(SourceSpec::Replay(PathBuf::from(camera)));
        }
        if camera == "-" {
            return Ok(SourceSpec::Stdin);
        }
        Ok(SourceSpec::Camera(camera.to_string()))
    }

    /// True when frames arrive with detections already attached.
    pub fn is_prelabeled(&self) -> bool {
        matches!(self, SourceSpec::Synthetic(_) | SourceSpec::Replay(_))
    }
}

/// Everything needed to open a source, resolved from configuration.
#[derive(Clone, Debug)]
pub struct SourceOptions {
    pub spec: SourceSpec,
    pub detector_bin: String,
    pub model: String,
    pub overlay: OverlayConfig,
    pub min_confidence: f32,
    pub width: u32,
    pub height: u32,
    pub capture_timeout: Duration,
    pub seed: u64,
    /// Synthetic only: stop after this many frames.
    pub frame_limit: Option<u64>,
    /// Synthetic only: pause between frames.
    pub frame_interval: Duration,
    /// Stdin only: detector output carries `bounding box` lines.
    pub stdin_boxes: bool,
}

impl SourceOptions {
    /// True when text output pairs every detection with a box line.
    pub fn expects_boxes(&self) -> bool {
        match self.spec {
            SourceSpec::Camera(_) => true,
            SourceSpec::Stdin => self.stdin_boxes,
            SourceSpec::Synthetic(_) | SourceSpec::Replay(_) => false,
        }
    }
}

/// Detector backend matching the source's payload, taught the rule set's classes.
pub fn detector_for(
    options: &SourceOptions,
    rules: &RuleSet,
) -> Result<Box<dyn DetectorBackend>> {
    if options.spec.is_prelabeled() {
        return Ok(Box::new(PrelabeledBackend::new()));
    }
    let backend = TextBackend::with_vocabulary(&rules.labels, rules.engine.classes())?
        .localized(options.expects_boxes());
    Ok(Box::new(backend))
}

/// Command line for the external detector process.
pub fn detector_command(options: &SourceOptions, camera: &str) -> Command {
    let mut command = Command::new(&options.detector_bin);
    command
        .arg(format!("--camera={}", camera))
        .arg(format!("--network={}", options.model))
        .arg(format!("--overlay={}", options.overlay))
        .arg(format!("--threshold={}", options.min_confidence))
        .arg(format!("--input-width={}", options.width))
        .arg(format!("--input-height={}", options.height));
    command
}

pub fn open_source(options: &SourceOptions) -> Result<Box<dyn FrameSource>> {
    let text_config = |name: String| TextConfig {
        name,
        width: options.width,
        height: options.height,
        capture_timeout: options.capture_timeout,
        expect_boxes: options.expects_boxes(),
        ..TextConfig::default()
    };
    let source: Box<dyn FrameSource> = match &options.spec {
        SourceSpec::Synthetic(name) => Box::new(SyntheticSource::new(SyntheticConfig {
            name: name.clone(),
            width: options.width,
            height: options.height,
            seed: options.seed,
            frame_limit: options.frame_limit,
            frame_interval: options.frame_interval,
        })),
        SourceSpec::Replay(path) => Box::new(ReplaySource::open(path)?),
        SourceSpec::Stdin => Box::new(TextSource::from_reader(
            std::io::stdin(),
            text_config("stdin".to_string()),
        )),
        SourceSpec::Camera(camera) => Box::new(TextSource::spawn(
            detector_command(options, camera),
            text_config(camera.clone()),
        )?),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{parse_rule_document, RuleFormat};

    #[test]
    fn camera_argument_selects_source() -> Result<()> {
        assert_eq!(
            SourceSpec::parse("stub://yard")?,
            SourceSpec::Synthetic("stub://yard".into())
        );
        assert_eq!(
            SourceSpec::parse("replay:/tmp/run.txt")?,
            SourceSpec::Replay("/tmp/run.txt".into())
        );
        assert_eq!(
            SourceSpec::parse("demos/session.JSONL")?,
            SourceSpec::Replay("demos/session.JSONL".into())
        );
        assert_eq!(SourceSpec::parse("-")?, SourceSpec::Stdin);
        assert_eq!(
            SourceSpec::parse("/dev/video0")?,
            SourceSpec::Camera("/dev/video0".into())
        );
        assert!(SourceSpec::parse("  ").is_err());
        assert!(SourceSpec::parse("replay:").is_err());
        Ok(())
    }

    fn options(spec: SourceSpec) -> SourceOptions {
        SourceOptions {
            spec,
            detector_bin: "detectnet".into(),
            model: "ssd-mobilenet-v2".into(),
            overlay: "boxes,labels,conf".parse().unwrap(),
            min_confidence: 0.5,
            width: 640,
            height: 480,
            capture_timeout: Duration::from_secs(1),
            seed: 0,
            frame_limit: None,
            frame_interval: Duration::ZERO,
            stdin_boxes: false,
        }
    }

    #[test]
    fn detector_matches_payload() -> Result<()> {
        let rules = parse_rule_document(
            "rules:\n  - {id: r2, type: min_distance, class: person, pixels: 50}\n",
            RuleFormat::Yaml,
        )?;
        let synthetic = detector_for(&options(SourceSpec::parse("stub://a")?), &rules)?;
        assert_eq!(synthetic.name(), "prelabeled");

        let camera = detector_for(
            &options(SourceSpec::Camera("/dev/video0".into())),
            &rules,
        )?;
        assert_eq!(camera.name(), "detectnet-text");
        assert!(rules.engine.ensure_supported_by(camera.as_ref()).is_ok());

        let stdin = detector_for(&options(SourceSpec::Stdin), &rules)?;
        assert!(rules.engine.ensure_supported_by(stdin.as_ref()).is_err());
        let stdin_boxes = SourceOptions {
            stdin_boxes: true,
            ..options(SourceSpec::Stdin)
        };
        let stdin = detector_for(&stdin_boxes, &rules)?;
        assert!(rules.engine.ensure_supported_by(stdin.as_ref()).is_ok());
        Ok(())
    }

    #[test]
    fn detector_command_carries_session_flags() -> Result<()> {
        let options = options(SourceSpec::Camera("/dev/video1".into()));
        let command = detector_command(&options, "/dev/video1");
        let args: Vec<String> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(command.get_program(), "detectnet");
        assert_eq!(
            args,
            vec![
                "--camera=/dev/video1",
                "--network=ssd-mobilenet-v2",
                "--overlay=box,labels,conf",
                "--threshold=0.5",
                "--input-width=640",
                "--input-height=480",
            ]
        );
        Ok(())
    }
}
