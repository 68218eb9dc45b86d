//! Frame Sentinel
//!
//! Rule-based anomaly monitoring over per-frame object detections.
//!
//! # Architecture
//!
//! Each frame flows through one loop iteration and is then dropped:
//!
//! 1. **Capture**: a `FrameSource` yields a frame or a liveness timeout.
//! 2. **Detect**: a `DetectorBackend` turns the frame into labeled detections.
//! 3. **Summarize**: detections collapse into per-class centroid lists.
//! 4. **Evaluate**: the `RuleEngine` checks every rule against the summary.
//! 5. **Log**: the rate-limited `AnomalyLog` appends CSV rows and prints notices.
//! 6. **Render**: the frame, with its alert banner, goes to a `FrameSink`.
//!
//! # Module Structure
//!
//! - `detect`: detections, bounding boxes, detector backends
//! - `frame`: frame handle and the source/sink traits
//! - `ingest`: replay, synthetic and detector-output sources
//! - `labels`, `summary`: label normalization and per-frame summaries
//! - `rules`: rule types, rule files, the engine
//! - `log`: cooldown gate and the append-only CSV log
//! - `monitor`: the frame loop

pub mod clock;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod labels;
pub mod log;
pub mod monitor;
pub mod rules;
pub mod shutdown;
pub mod sink;
pub mod summary;

pub use crate::log::{
    read_records, AnomalyLog, AnomalyLogConfig, CsvFileStore, InMemoryRecordStore, LogRecord,
    LogSettings, RateLimitPolicy, RecordOutcome, RecordStore,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MonitorArgs, MonitorConfig};
pub use detect::{
    BoundingBox, Centroid, Detection, DetectionCapability, DetectorBackend, OverlayConfig,
    PrelabeledBackend, TextBackend,
};
pub use frame::{Capture, Frame, FramePayload, FrameSink, FrameSource, SourceStats};
pub use ingest::{open_source, ReplaySource, SourceOptions, SourceSpec, SyntheticSource, TextSource};
pub use labels::LabelPolicy;
pub use monitor::{FrameLoop, LoopSettings, SessionStats, StepOutcome};
pub use rules::{load_rule_file, AnomalyEvent, Rule, RuleEngine, RuleKind, RuleSet};
pub use shutdown::Shutdown;
pub use sink::LogSink;
pub use summary::{FrameSummarizer, FrameSummary};
