use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::detect::OverlayConfig;
use crate::ingest::{SourceOptions, SourceSpec};
use crate::log::{AnomalyLogConfig, LogSettings, RateLimitPolicy};
use crate::monitor::{LoopSettings, DEFAULT_HEALTH_INTERVAL};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// Command-line and environment parameters for `sentineld`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sentineld",
    author,
    version,
    about = "Rule-based anomaly monitor for object detector output"
)]
pub struct MonitorArgs {
    /// Camera id for the detector, `-` for detector output on stdin,
    /// `*.jsonl`/`replay:PATH` for a recorded session, or `stub://NAME` for synthetic scenes.
    #[arg(long, env = "SENTINEL_CAMERA", default_value = "/dev/video0")]
    pub camera: String,

    /// Detection model name passed to the detector.
    #[arg(long, env = "SENTINEL_MODEL", default_value = "ssd-mobilenet-v2")]
    pub model: String,

    /// Overlay flags passed to the detector (`boxes,labels,conf` or `none`).
    #[arg(long, env = "SENTINEL_OVERLAY", default_value = "boxes,labels,conf")]
    pub overlay: String,

    /// Rule file (YAML, JSON or TOML by extension).
    #[arg(long, env = "SENTINEL_RULES", default_value = "rules.yaml")]
    pub rules: PathBuf,

    /// Anomaly log CSV file (appended to, never truncated).
    #[arg(long, env = "SENTINEL_LOG", default_value = "anomaly_log.csv")]
    pub log: PathBuf,

    /// Minimum detection confidence, 0..=1.
    #[arg(long, env = "SENTINEL_THRESHOLD", default_value_t = 0.5)]
    pub threshold: f32,

    /// Seconds between logged anomaly batches.
    #[arg(long, env = "SENTINEL_COOLDOWN_SECS", default_value_t = 1.0)]
    pub cooldown_secs: f64,

    /// Cooldown scope: `global` or `per-rule`.
    #[arg(long, env = "SENTINEL_RATE_LIMIT", default_value = "global")]
    pub rate_limit: String,

    /// Detector executable launched for camera sources.
    #[arg(long, env = "SENTINEL_DETECTOR_BIN", default_value = "detectnet")]
    pub detector_bin: String,

    #[arg(long, env = "SENTINEL_CAPTURE_TIMEOUT_MS", default_value_t = 1000)]
    pub capture_timeout_ms: u64,

    /// Warn after this many seconds without a frame.
    #[arg(long, env = "SENTINEL_IDLE_WARN_SECS", default_value_t = 10)]
    pub idle_warn_secs: u64,

    /// Retries for a failed log append.
    #[arg(long, env = "SENTINEL_WRITE_RETRIES", default_value_t = 2)]
    pub write_retries: u32,

    /// Consecutive failed batches before escalating.
    #[arg(long, env = "SENTINEL_ESCALATE_AFTER", default_value_t = 3)]
    pub escalate_after: u32,

    /// Seed for synthetic scenes.
    #[arg(long, env = "SENTINEL_SEED", default_value_t = 0)]
    pub seed: u64,

    /// Synthetic frame rate.
    #[arg(long, env = "SENTINEL_FPS", default_value_t = 10)]
    pub fps: u32,

    /// Stop synthetic sources after this many frames.
    #[arg(long, env = "SENTINEL_FRAMES")]
    pub frames: Option<u64>,

    /// Detector output on stdin carries `bounding box` lines.
    #[arg(long, env = "SENTINEL_STDIN_BOXES")]
    pub stdin_boxes: bool,
}

/// Validated monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: SourceOptions,
    pub rules_path: PathBuf,
    pub log: AnomalyLogConfig,
    pub idle_warn: Duration,
}

impl MonitorConfig {
    pub fn from_args(args: MonitorArgs) -> Result<Self> {
        if !(0.0..=1.0).contains(&args.threshold) {
            return Err(anyhow!(
                "threshold must be within 0..=1 (got {})",
                args.threshold
            ));
        }
        if !args.cooldown_secs.is_finite() || args.cooldown_secs < 0.0 {
            return Err(anyhow!(
                "cooldown must be a non-negative number of seconds (got {})",
                args.cooldown_secs
            ));
        }
        let cooldown = Duration::try_from_secs_f64(args.cooldown_secs)
            .map_err(|e| anyhow!("cooldown {} is out of range: {}", args.cooldown_secs, e))?;
        let policy: RateLimitPolicy = args.rate_limit.parse()?;
        let overlay: OverlayConfig = args.overlay.parse()?;
        if args.capture_timeout_ms == 0 {
            return Err(anyhow!("capture timeout must be > 0"));
        }
        if args.idle_warn_secs == 0 {
            return Err(anyhow!("idle warning interval must be > 0"));
        }
        if args.escalate_after == 0 {
            return Err(anyhow!("escalate_after must be at least 1"));
        }
        if args.fps == 0 {
            return Err(anyhow!("fps must be > 0"));
        }
        if args.detector_bin.trim().is_empty() {
            return Err(anyhow!("detector binary must not be empty"));
        }
        let spec = SourceSpec::parse(&args.camera)?;

        Ok(Self {
            source: SourceOptions {
                spec,
                detector_bin: args.detector_bin,
                model: args.model,
                overlay,
                min_confidence: args.threshold,
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                capture_timeout: Duration::from_millis(args.capture_timeout_ms),
                seed: args.seed,
                frame_limit: args.frames,
                frame_interval: Duration::from_secs(1) / args.fps,
                stdin_boxes: args.stdin_boxes,
            },
            rules_path: args.rules,
            log: AnomalyLogConfig {
                path: args.log,
                settings: LogSettings {
                    cooldown,
                    policy,
                    write_retries: args.write_retries,
                    escalate_after: args.escalate_after,
                },
            },
            idle_warn: Duration::from_secs(args.idle_warn_secs),
        })
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            min_confidence: self.source.min_confidence,
            overlay: self.source.overlay,
            idle_warn: self.idle_warn,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> MonitorArgs {
        let mut argv = vec!["sentineld", "--camera", "stub://test"];
        argv.extend_from_slice(extra);
        MonitorArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn builds_typed_settings() -> Result<()> {
        let cfg = MonitorConfig::from_args(args(&[
            "--cooldown-secs",
            "2.5",
            "--rate-limit",
            "per-rule",
            "--fps",
            "20",
        ]))?;
        assert_eq!(cfg.log.settings.cooldown, Duration::from_millis(2500));
        assert_eq!(cfg.log.settings.policy, RateLimitPolicy::PerRule);
        assert_eq!(cfg.source.frame_interval, Duration::from_millis(50));
        assert_eq!(cfg.loop_settings().min_confidence, 0.5);
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_values() {
        for bad in [
            &["--threshold", "1.5"][..],
            &["--cooldown-secs=-1"][..],
            &["--cooldown-secs", "NaN"][..],
            &["--overlay", "sparkles"][..],
            &["--rate-limit", "never"][..],
            &["--capture-timeout-ms", "0"][..],
            &["--escalate-after", "0"][..],
        ] {
            assert!(
                MonitorConfig::from_args(args(bad)).is_err(),
                "accepted {:?}",
                bad
            );
        }
    }
}
