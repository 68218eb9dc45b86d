//! The frame loop: capture, detect, summarize, evaluate, log, render.

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::detect::{DetectorBackend, OverlayConfig};
use crate::frame::{Capture, FrameSink, FrameSource};
use crate::log::{AnomalyLog, CsvFileStore, RecordStore};
use crate::rules::RuleEngine;
use crate::shutdown::Shutdown;
use crate::summary::FrameSummarizer;

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_IDLE_WARN: Duration = Duration::from_secs(10);

/// Per-session loop parameters.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub min_confidence: f32,
    pub overlay: OverlayConfig,
    /// Warn when no frame has arrived for this long, and again after each further interval.
    pub idle_warn: Duration,
    pub health_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            overlay: OverlayConfig::default(),
            idle_warn: DEFAULT_IDLE_WARN,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

/// Counters for one monitoring session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub timeouts: u64,
    pub idle_warnings: u64,
    pub detections: u64,
    pub events_raised: u64,
    pub logged: u64,
    pub suppressed: u64,
    pub failed: u64,
}

/// Result of a single iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Frame { detections: usize, events: usize },
    Idle,
    Closed,
}

pub struct FrameLoop<S: RecordStore = CsvFileStore> {
    summarizer: FrameSummarizer,
    engine: RuleEngine,
    log: AnomalyLog<S>,
    settings: LoopSettings,
    clock: Box<dyn Clock>,
    stats: SessionStats,
    last_frame_at: Instant,
    idle_warnings_in_outage: u32,
}

impl<S: RecordStore> FrameLoop<S> {
    pub fn new(
        summarizer: FrameSummarizer,
        engine: RuleEngine,
        log: AnomalyLog<S>,
        settings: LoopSettings,
    ) -> Self {
        Self::with_clock(summarizer, engine, log, settings, Box::new(SystemClock))
    }

    pub fn with_clock(
        summarizer: FrameSummarizer,
        engine: RuleEngine,
        log: AnomalyLog<S>,
        settings: LoopSettings,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            summarizer,
            engine,
            log,
            settings,
            clock,
            stats: SessionStats::default(),
            last_frame_at: Instant::now(),
            idle_warnings_in_outage: 0,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn anomaly_log(&self) -> &AnomalyLog<S> {
        &self.log
    }

    /// One capture attempt and, if a frame arrived, its full evaluation.
    pub fn step(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn DetectorBackend,
        sink: &mut dyn FrameSink,
    ) -> Result<StepOutcome> {
        let mut frame = match source.capture()? {
            Capture::Frame(frame) => frame,
            Capture::Timeout => {
                self.stats.timeouts += 1;
                self.check_liveness();
                return Ok(StepOutcome::Idle);
            }
            Capture::Closed => return Ok(StepOutcome::Closed),
        };
        self.frame_arrived();
        self.stats.frames += 1;

        let detections =
            detector.detect(&frame, self.settings.min_confidence, &self.settings.overlay)?;
        for det in &detections {
            log::debug!("[detect] {} conf={:.2}", det.label(), det.confidence());
        }
        self.stats.detections += detections.len() as u64;

        let summary = self.summarizer.summarize(&detections);
        let events = self.engine.evaluate(&summary);
        if let Some(first) = events.first() {
            frame.set_banner(format!("ANOMALY: {}", first.rule_id));
            self.stats.events_raised += events.len() as u64;
            let outcome = self.log.record(&events, self.clock.now());
            self.stats.logged += outcome.logged as u64;
            self.stats.suppressed += outcome.suppressed as u64;
            self.stats.failed += outcome.failed as u64;
        }

        sink.render(&frame)?;
        sink.set_status(&format!(
            "Detections: {} | Counts: {}",
            detections.len(),
            summary
        ));
        Ok(StepOutcome::Frame {
            detections: detections.len(),
            events: events.len(),
        })
    }

    /// Run until the source or sink stops, the source closes, or `shutdown` is requested.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn DetectorBackend,
        sink: &mut dyn FrameSink,
        shutdown: &Shutdown,
    ) -> Result<SessionStats> {
        detector.warm_up()?;
        self.engine.ensure_supported_by(detector)?;
        log::info!(
            "monitoring {} with {} detector, {} rule(s), log {}",
            source.stats().source,
            detector.name(),
            self.engine.len(),
            self.log.store().describe()
        );

        self.last_frame_at = Instant::now();
        let mut last_health_log = Instant::now();
        loop {
            if shutdown.is_requested() {
                log::info!("interrupt received; stopping");
                break;
            }
            if !source.is_streaming() || !sink.is_streaming() {
                log::info!("stream ended");
                break;
            }
            if self.step(source, detector, sink)? == StepOutcome::Closed {
                log::info!("source closed");
                break;
            }

            if last_health_log.elapsed() >= self.settings.health_interval {
                let src = source.stats();
                log::info!(
                    "health: frames={} timeouts={} logged={} suppressed={} source={}",
                    src.frames_captured,
                    src.timeouts,
                    self.stats.logged,
                    self.stats.suppressed,
                    src.source
                );
                last_health_log = Instant::now();
            }
        }

        let stats = &self.stats;
        log::info!(
            "session summary: frames={} timeouts={} detections={} events={} logged={} suppressed={} failed={}",
            stats.frames,
            stats.timeouts,
            stats.detections,
            stats.events_raised,
            stats.logged,
            stats.suppressed,
            stats.failed
        );
        Ok(self.stats.clone())
    }

    fn check_liveness(&mut self) {
        let idle = self.last_frame_at.elapsed();
        let next_warning = self
            .settings
            .idle_warn
            .saturating_mul(self.idle_warnings_in_outage.saturating_add(1));
        if idle >= next_warning {
            self.idle_warnings_in_outage += 1;
            self.stats.idle_warnings += 1;
            log::warn!(
                "no frames for {:.1}s; camera or detector may be stalled",
                idle.as_secs_f64()
            );
        }
    }

    fn frame_arrived(&mut self) {
        if self.idle_warnings_in_outage > 0 {
            log::info!(
                "frames resumed after {:.1}s",
                self.last_frame_at.elapsed().as_secs_f64()
            );
            self.idle_warnings_in_outage = 0;
        }
        self.last_frame_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::{BoundingBox, Detection, PrelabeledBackend, TextBackend};
    use crate::frame::{Frame, SourceStats};
    use crate::labels::LabelPolicy;
    use crate::log::{InMemoryRecordStore, LogSettings};
    use crate::rules::{Rule, RuleKind};
    use crate::sink::LogSink;
    use chrono::Local;
    use std::collections::VecDeque;

    /// Source that replays a fixed list of captures.
    struct ScriptedSource {
        script: VecDeque<Capture>,
        frames: u64,
    }

    impl ScriptedSource {
        fn new(script: Vec<Capture>) -> Self {
            Self {
                script: script.into(),
                frames: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn is_streaming(&self) -> bool {
            !self.script.is_empty()
        }

        fn capture(&mut self) -> Result<Capture> {
            let capture = self.script.pop_front().unwrap_or(Capture::Closed);
            if matches!(capture, Capture::Frame(_)) {
                self.frames += 1;
            }
            Ok(capture)
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.frames,
                timeouts: 0,
                source: "scripted".into(),
            }
        }
    }

    fn person_at(x: f64) -> Detection {
        Detection::new(
            "person",
            0.9,
            BoundingBox::new(x, 0.0, x + 10.0, 20.0).unwrap(),
        )
        .unwrap()
    }

    fn crowd(index: u64, n: usize) -> Capture {
        let dets = (0..n).map(|i| person_at(i as f64 * 100.0)).collect();
        Capture::Frame(Frame::prelabeled(index, 640, 480, dets))
    }

    fn frame_loop(rules: Vec<Rule>, clock: ManualClock) -> FrameLoop<InMemoryRecordStore> {
        let log = AnomalyLog::with_store(
            InMemoryRecordStore::new(),
            LogSettings {
                cooldown: Duration::from_secs(2),
                ..LogSettings::default()
            },
        )
        .unwrap();
        FrameLoop::with_clock(
            FrameSummarizer::new(LabelPolicy::default()),
            RuleEngine::new(rules).unwrap(),
            log,
            LoopSettings::default(),
            Box::new(clock),
        )
    }

    fn max_people() -> Rule {
        Rule::new(
            "max_people",
            RuleKind::CountOver {
                class: "person".into(),
                threshold: 3.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn anomalous_frame_gets_banner_and_log_row() -> Result<()> {
        let clock = ManualClock::new(Local::now());
        let mut fl = frame_loop(vec![max_people()], clock);
        let mut source = ScriptedSource::new(vec![crowd(1, 4), crowd(2, 2)]);
        let mut detector = PrelabeledBackend::new();
        let mut sink = LogSink::new();

        let outcome = fl.step(&mut source, &mut detector, &mut sink)?;
        assert_eq!(
            outcome,
            StepOutcome::Frame {
                detections: 4,
                events: 1
            }
        );
        assert_eq!(sink.banners_shown(), 1);
        assert_eq!(sink.last_status(), "Detections: 4 | Counts: {person: 4}");

        fl.step(&mut source, &mut detector, &mut sink)?;
        assert_eq!(sink.banners_shown(), 1);
        assert_eq!(fl.anomaly_log().store().rows().len(), 2);
        assert!(fl.anomaly_log().store().rows()[1].ends_with(",max_people,person=4>3\r\n"));
        Ok(())
    }

    #[test]
    fn cooldown_follows_the_injected_clock() -> Result<()> {
        let clock = ManualClock::new(Local::now());
        let mut fl = frame_loop(vec![max_people()], clock.clone());
        let mut source = ScriptedSource::new(vec![crowd(1, 4), crowd(2, 5), crowd(3, 6)]);
        let mut detector = PrelabeledBackend::new();
        let mut sink = LogSink::new();

        fl.step(&mut source, &mut detector, &mut sink)?;
        clock.advance(Duration::from_secs(1));
        fl.step(&mut source, &mut detector, &mut sink)?;
        clock.advance(Duration::from_millis(1500));
        fl.step(&mut source, &mut detector, &mut sink)?;

        let stats = fl.stats();
        assert_eq!((stats.events_raised, stats.logged, stats.suppressed), (3, 2, 1));
        Ok(())
    }

    #[test]
    fn timeouts_are_idle_not_anomalies() -> Result<()> {
        let clock = ManualClock::new(Local::now());
        let mut fl = frame_loop(vec![max_people()], clock);
        fl.settings.idle_warn = Duration::from_millis(1);
        let mut source = ScriptedSource::new(vec![Capture::Timeout, Capture::Timeout]);
        let mut detector = PrelabeledBackend::new();
        let mut sink = LogSink::new();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            fl.step(&mut source, &mut detector, &mut sink)?,
            StepOutcome::Idle
        );
        assert_eq!(fl.stats().timeouts, 1);
        assert_eq!(fl.stats().idle_warnings, 1);
        assert_eq!(fl.stats().events_raised, 0);
        assert_eq!(sink.frames_rendered(), 0);
        Ok(())
    }

    #[test]
    fn run_stops_when_source_closes() -> Result<()> {
        let clock = ManualClock::new(Local::now());
        let mut fl = frame_loop(vec![max_people()], clock);
        let mut source = ScriptedSource::new(vec![crowd(1, 4), Capture::Timeout, crowd(2, 1)]);
        let stats = fl.run(
            &mut source,
            &mut PrelabeledBackend::new(),
            &mut LogSink::new(),
            &Shutdown::new(),
        )?;
        assert_eq!((stats.frames, stats.timeouts, stats.logged), (2, 1, 1));
        Ok(())
    }

    #[test]
    fn interrupt_before_first_frame_records_nothing() -> Result<()> {
        let clock = ManualClock::new(Local::now());
        let mut fl = frame_loop(vec![max_people()], clock);
        let shutdown = Shutdown::new();
        shutdown.request();
        let mut source = ScriptedSource::new(vec![crowd(1, 4)]);
        let stats = fl.run(
            &mut source,
            &mut PrelabeledBackend::new(),
            &mut LogSink::new(),
            &shutdown,
        )?;
        assert_eq!(stats, SessionStats::default());
        assert_eq!(fl.anomaly_log().store().rows().len(), 1);
        Ok(())
    }

    #[test]
    fn distance_rules_refuse_the_text_detector() {
        let clock = ManualClock::new(Local::now());
        let rule = Rule::new(
            "r2",
            RuleKind::MinDistance {
                class: "person".into(),
                pixels: 50.0,
            },
        )
        .unwrap();
        let mut fl = frame_loop(vec![rule], clock);
        let mut source = ScriptedSource::new(vec![]);
        let err = fl
            .run(
                &mut source,
                &mut TextBackend::new(),
                &mut LogSink::new(),
                &Shutdown::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("r2"), "{}", err);
    }
}
