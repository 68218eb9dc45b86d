//! Rate-limited, append-only anomaly log.
//!
//! Every logged event becomes one CSV row `timestamp,rule_id,details` and one
//! `[ANOMALY]` line on stdout. Rows are synced before `record` returns. Write
//! failures never stop the monitor: they are retried, reported, and escalated
//! when they persist.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rules::AnomalyEvent;

mod csv;
mod rate_limit;
mod store;

pub use csv::{encode_row, parse_rows};
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use store::{CsvFileStore, InMemoryRecordStore, LogFile, RecordStore};

pub const LOG_HEADER: [&str; 3] = ["timestamp", "rule_id", "details"];
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DEFAULT_COOLDOWN_SECS: f64 = 1.0;
pub const DEFAULT_WRITE_RETRIES: u32 = 2;
pub const DEFAULT_ESCALATE_AFTER: u32 = 3;

/// Rate limiting and failure handling for an `AnomalyLog`.
#[derive(Clone, Debug)]
pub struct LogSettings {
    pub cooldown: Duration,
    pub policy: RateLimitPolicy,
    /// Extra attempts after a failed append.
    pub write_retries: u32,
    /// Consecutive failed batches before escalating to error level.
    pub escalate_after: u32,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs_f64(DEFAULT_COOLDOWN_SECS),
            policy: RateLimitPolicy::Global,
            write_retries: DEFAULT_WRITE_RETRIES,
            escalate_after: DEFAULT_ESCALATE_AFTER,
        }
    }
}

/// Location and settings of the on-disk anomaly log.
#[derive(Clone, Debug)]
pub struct AnomalyLogConfig {
    pub path: PathBuf,
    pub settings: LogSettings,
}

/// What happened to one frame's events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    pub logged: usize,
    pub suppressed: usize,
    pub failed: usize,
}

/// One persisted row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: String,
    pub rule_id: String,
    pub details: String,
}

pub struct AnomalyLog<S: RecordStore = CsvFileStore> {
    store: S,
    limiter: RateLimiter,
    settings: LogSettings,
    failed_batches: u32,
}

impl AnomalyLog<CsvFileStore> {
    /// Open (or create) the CSV log. Unreachable paths fail here, before monitoring starts.
    pub fn open(config: AnomalyLogConfig) -> Result<Self> {
        let store = CsvFileStore::open(&config.path)?;
        Self::with_store(store, config.settings)
    }
}

impl<S: RecordStore> AnomalyLog<S> {
    pub fn with_store(store: S, settings: LogSettings) -> Result<Self> {
        if settings.escalate_after == 0 {
            return Err(anyhow!("escalate_after must be at least 1"));
        }
        let limiter = RateLimiter::new(settings.policy, settings.cooldown)?;
        Ok(Self {
            store,
            limiter,
            settings,
            failed_batches: 0,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    pub fn last_event_time(&self) -> Option<DateTime<Local>> {
        self.limiter.last_event_time()
    }

    /// Consecutive batches in which at least one row could not be written.
    pub fn consecutive_failed_batches(&self) -> u32 {
        self.failed_batches
    }

    /// Persist one frame's events, subject to the cooldown.
    pub fn record(&mut self, events: &[AnomalyEvent], now: DateTime<Local>) -> RecordOutcome {
        let mut outcome = RecordOutcome::default();
        if events.is_empty() {
            return outcome;
        }

        let (admitted, suppressed) = self.limiter.admit(events, now);
        outcome.suppressed = suppressed;
        if admitted.is_empty() {
            log::debug!(
                "cooldown active ({}): suppressed {} event(s)",
                self.settings.policy,
                suppressed
            );
            return outcome;
        }

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let mut logged = Vec::with_capacity(admitted.len());
        for event in admitted {
            let row = encode_row(&[
                timestamp.as_str(),
                event.rule_id.as_str(),
                event.details.as_str(),
            ]);
            match self.append_with_retry(&row) {
                Ok(()) => {
                    println!("{}", notice_line(event));
                    logged.push(event);
                }
                Err(e) => {
                    outcome.failed += 1;
                    log::warn!(
                        "anomaly {} not persisted to {}: {:#}",
                        event.rule_id,
                        self.store.describe(),
                        e
                    );
                }
            }
        }
        outcome.logged = logged.len();
        self.limiter.mark(&logged, now);
        self.track_failures(outcome.failed > 0);
        outcome
    }

    fn append_with_retry(&mut self, row: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.append_row(row) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.settings.write_retries => {
                    attempt += 1;
                    log::debug!("append attempt {} failed: {:#}; retrying", attempt, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn track_failures(&mut self, failed: bool) {
        if !failed {
            if self.failed_batches > 0 {
                log::info!(
                    "anomaly log {} writable again after {} failed batch(es)",
                    self.store.describe(),
                    self.failed_batches
                );
            }
            self.failed_batches = 0;
            return;
        }
        self.failed_batches += 1;
        if self.failed_batches % self.settings.escalate_after == 0 {
            log::error!(
                "ANOMALY LOG FAILING: {} consecutive batches could not be written to {}; anomalies are being lost",
                self.failed_batches,
                self.store.describe()
            );
        }
    }
}

/// Operator-facing console line for one logged event.
pub fn notice_line(event: &AnomalyEvent) -> String {
    format!("[ANOMALY] {}: {}", event.rule_id, event.details)
}

/// Read every record of a CSV anomaly log. The header must be present.
pub fn read_records(path: &Path) -> Result<Vec<LogRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read anomaly log {}", path.display()))?;
    let mut rows = parse_rows(&text)
        .with_context(|| format!("malformed anomaly log {}", path.display()))?
        .into_iter();
    match rows.next() {
        Some(header) if header == LOG_HEADER => {}
        Some(header) => {
            return Err(anyhow!(
                "{}: unexpected header {:?}",
                path.display(),
                header
            ))
        }
        None => return Err(anyhow!("{}: missing header row", path.display())),
    }
    rows.enumerate()
        .map(|(i, row)| match <[String; 3]>::try_from(row) {
            Ok([timestamp, rule_id, details]) => Ok(LogRecord {
                timestamp,
                rule_id,
                details,
            }),
            Err(row) => Err(anyhow!(
                "{}: record {} has {} fields, expected 3",
                path.display(),
                i + 1,
                row.len()
            )),
        })
        .collect()
}
