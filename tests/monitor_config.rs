use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use tempfile::NamedTempFile;

use frame_sentinel::{
    ingest, load_rule_file, MonitorArgs, MonitorConfig, RateLimitPolicy, SourceSpec,
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CAMERA",
        "SENTINEL_MODEL",
        "SENTINEL_OVERLAY",
        "SENTINEL_RULES",
        "SENTINEL_LOG",
        "SENTINEL_THRESHOLD",
        "SENTINEL_COOLDOWN_SECS",
        "SENTINEL_RATE_LIMIT",
        "SENTINEL_DETECTOR_BIN",
        "SENTINEL_CAPTURE_TIMEOUT_MS",
        "SENTINEL_IDLE_WARN_SECS",
        "SENTINEL_WRITE_RETRIES",
        "SENTINEL_ESCALATE_AFTER",
        "SENTINEL_SEED",
        "SENTINEL_FPS",
        "SENTINEL_FRAMES",
        "SENTINEL_STDIN_BOXES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_match_the_detectnet_session() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let args = MonitorArgs::try_parse_from(["sentineld"]).expect("parse defaults");
    let cfg = MonitorConfig::from_args(args).expect("valid defaults");
    assert_eq!(cfg.source.spec, SourceSpec::Camera("/dev/video0".into()));
    assert_eq!(cfg.source.model, "ssd-mobilenet-v2");
    assert_eq!(cfg.source.overlay.to_string(), "box,labels,conf");
    assert_eq!(cfg.source.detector_bin, "detectnet");
    assert_eq!(cfg.source.min_confidence, 0.5);
    assert_eq!(cfg.source.capture_timeout, Duration::from_secs(1));
    assert_eq!(cfg.rules_path.to_str(), Some("rules.yaml"));
    assert_eq!(cfg.log.path.to_str(), Some("anomaly_log.csv"));
    assert_eq!(cfg.log.settings.cooldown, Duration::from_secs(1));
    assert_eq!(cfg.log.settings.policy, RateLimitPolicy::Global);
    assert_eq!(cfg.log.settings.write_retries, 2);
    assert_eq!(cfg.log.settings.escalate_after, 3);
    assert_eq!(cfg.idle_warn, Duration::from_secs(10));
}

#[test]
fn shipped_rules_start_against_the_default_detector() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let args = MonitorArgs::try_parse_from(["sentineld"]).expect("parse defaults");
    let cfg = MonitorConfig::from_args(args).expect("valid defaults");
    let rules_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("rules.yaml");
    let rule_set = load_rule_file(&rules_path).expect("shipped rules load");
    let detector = ingest::detector_for(&cfg.source, &rule_set).expect("detector");
    rule_set
        .engine
        .ensure_supported_by(detector.as_ref())
        .expect("default detector serves every shipped rule");

    let args = MonitorArgs::try_parse_from(["sentineld", "--camera", "-"]).expect("parse args");
    let cfg = MonitorConfig::from_args(args).expect("valid config");
    let detector = ingest::detector_for(&cfg.source, &rule_set).expect("detector");
    assert!(rule_set.engine.ensure_supported_by(detector.as_ref()).is_err());
}

#[test]
fn env_vars_fill_in_and_flags_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_CAMERA", "stub://yard");
    std::env::set_var("SENTINEL_COOLDOWN_SECS", "4");
    std::env::set_var("SENTINEL_RATE_LIMIT", "per-rule");
    std::env::set_var("SENTINEL_THRESHOLD", "0.9");

    let args = MonitorArgs::try_parse_from(["sentineld", "--threshold", "0.25", "--frames", "5"])
        .expect("parse args");
    let cfg = MonitorConfig::from_args(args).expect("valid config");
    clear_env();

    assert_eq!(cfg.source.spec, SourceSpec::Synthetic("stub://yard".into()));
    assert_eq!(cfg.source.min_confidence, 0.25);
    assert_eq!(cfg.source.frame_limit, Some(5));
    assert_eq!(cfg.log.settings.cooldown, Duration::from_secs(4));
    assert_eq!(cfg.log.settings.policy, RateLimitPolicy::PerRule);
}

#[test]
fn invalid_values_fail_before_monitoring() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_OVERLAY", "boxes,glitter");
    let args = MonitorArgs::try_parse_from(["sentineld"]).expect("parse args");
    let err = MonitorConfig::from_args(args).unwrap_err();
    clear_env();
    assert!(err.to_string().contains("glitter"), "{}", err);

    let args = MonitorArgs::try_parse_from(["sentineld", "--threshold", "2"]).expect("parse args");
    assert!(MonitorConfig::from_args(args).is_err());
}

#[test]
fn rule_file_errors_name_the_file() {
    let mut file = NamedTempFile::new().expect("temp rules");
    std::io::Write::write_all(
        &mut file,
        b"rules:\n  - id: a\n    type: teleport\n    class: person\n",
    )
    .expect("write rules");
    let err = load_rule_file(file.path()).unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("invalid rule file"), "{}", msg);
    assert!(msg.contains("teleport"), "{}", msg);
}
