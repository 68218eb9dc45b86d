//! sentineld - rule-based anomaly monitor
//!
//! This daemon:
//! 1. Loads and validates the rule file
//! 2. Opens (or creates) the anomaly log before any frame is read
//! 3. Reads frames and detections from the configured source
//! 4. Evaluates every rule per frame and logs anomalies, rate-limited
//! 5. Stops cleanly on Ctrl-C or end of stream

use anyhow::{Context, Result};
use clap::Parser;

use frame_sentinel::{
    ingest, load_rule_file, AnomalyLog, FrameLoop, FrameSummarizer, LogSink, MonitorArgs,
    MonitorConfig, Shutdown,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = MonitorArgs::parse();
    let cfg = MonitorConfig::from_args(args)?;

    let rule_set = load_rule_file(&cfg.rules_path)?;
    log::info!(
        "loaded {} rule(s) from {}",
        rule_set.engine.len(),
        cfg.rules_path.display()
    );

    let mut detector = ingest::detector_for(&cfg.source, &rule_set)?;
    rule_set.engine.ensure_supported_by(detector.as_ref())?;

    let anomaly_log = AnomalyLog::open(cfg.log.clone())
        .with_context(|| format!("cannot use anomaly log {}", cfg.log.path.display()))?;
    log::info!(
        "cooldown {:.1}s ({}), writing to {}",
        cfg.log.settings.cooldown.as_secs_f64(),
        cfg.log.settings.policy,
        cfg.log.path.display()
    );

    let mut source = ingest::open_source(&cfg.source)?;
    let shutdown = Shutdown::install_ctrlc_handler()?;
    let mut sink = LogSink::new();

    let mut frame_loop = FrameLoop::new(
        FrameSummarizer::new(rule_set.labels),
        rule_set.engine,
        anomaly_log,
        cfg.loop_settings(),
    );
    let stats = frame_loop.run(source.as_mut(), detector.as_mut(), &mut sink, &shutdown)?;
    log::info!(
        "sentineld stopped: {} frame(s), {} anomaly row(s) written",
        stats.frames,
        stats.logged
    );
    Ok(())
}
