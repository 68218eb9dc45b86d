use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, TimeDelta};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::rules::AnomalyEvent;

/// Scope of the anomaly cooldown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// One cooldown shared by every rule: a logged batch silences all rules.
    #[default]
    Global,
    /// Each rule id has its own cooldown.
    PerRule,
}

impl FromStr for RateLimitPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(RateLimitPolicy::Global),
            "per-rule" | "per_rule" | "rule" => Ok(RateLimitPolicy::PerRule),
            other => Err(anyhow!(
                "unknown rate limit policy '{}' (expected global or per-rule)",
                other
            )),
        }
    }
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitPolicy::Global => f.write_str("global"),
            RateLimitPolicy::PerRule => f.write_str("per-rule"),
        }
    }
}

/// Cooldown gate in front of the anomaly log.
///
/// A missing entry stands for the Unix epoch: the first event always passes.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    cooldown: TimeDelta,
    last_event_time: Option<DateTime<Local>>,
    last_by_rule: HashMap<String, DateTime<Local>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, cooldown: Duration) -> Result<Self> {
        let cooldown = TimeDelta::from_std(cooldown)
            .map_err(|_| anyhow!("cooldown {:?} is out of range", cooldown))?;
        Ok(Self {
            policy,
            cooldown,
            last_event_time: None,
            last_by_rule: HashMap::new(),
        })
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn last_event_time(&self) -> Option<DateTime<Local>> {
        self.last_event_time
    }

    fn open_since(&self, last: Option<DateTime<Local>>, now: DateTime<Local>) -> bool {
        match last {
            Some(last) => now.signed_duration_since(last) > self.cooldown,
            None => true,
        }
    }

    /// Split a frame's events into those allowed through and the suppressed count.
    pub fn admit<'a>(
        &self,
        events: &'a [AnomalyEvent],
        now: DateTime<Local>,
    ) -> (Vec<&'a AnomalyEvent>, usize) {
        let admitted: Vec<&AnomalyEvent> = match self.policy {
            RateLimitPolicy::Global => {
                if self.open_since(self.last_event_time, now) {
                    events.iter().collect()
                } else {
                    Vec::new()
                }
            }
            RateLimitPolicy::PerRule => events
                .iter()
                .filter(|event| {
                    self.open_since(self.last_by_rule.get(&event.rule_id).copied(), now)
                })
                .collect(),
        };
        let suppressed = events.len() - admitted.len();
        (admitted, suppressed)
    }

    /// Record that `logged` events were persisted at `now`.
    pub fn mark(&mut self, logged: &[&AnomalyEvent], now: DateTime<Local>) {
        if logged.is_empty() {
            return;
        }
        self.last_event_time = Some(now);
        if self.policy == RateLimitPolicy::PerRule {
            for event in logged {
                self.last_by_rule.insert(event.rule_id.clone(), now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(ids: &[&str]) -> Vec<AnomalyEvent> {
        ids.iter().map(|id| AnomalyEvent::new(*id, "x")).collect()
    }

    #[test]
    fn global_gate_suppresses_whole_batches() -> Result<()> {
        let mut limiter = RateLimiter::new(RateLimitPolicy::Global, Duration::from_secs(2))?;
        let t0 = Local::now();
        let batch = events(&["max_people", "forbid_phone"]);

        let (admitted, suppressed) = limiter.admit(&batch, t0);
        assert_eq!((admitted.len(), suppressed), (2, 0));
        limiter.mark(&admitted, t0);

        let other = events(&["r1"]);
        let (admitted, suppressed) = limiter.admit(&other, t0 + TimeDelta::seconds(1));
        assert_eq!((admitted.len(), suppressed), (0, 1));

        // Exactly at the cooldown boundary is still suppressed.
        let (admitted, _) = limiter.admit(&other, t0 + TimeDelta::seconds(2));
        assert!(admitted.is_empty());

        let (admitted, _) = limiter.admit(&other, t0 + TimeDelta::milliseconds(2001));
        assert_eq!(admitted.len(), 1);
        Ok(())
    }

    #[test]
    fn per_rule_gate_tracks_ids_independently() -> Result<()> {
        let mut limiter = RateLimiter::new(RateLimitPolicy::PerRule, Duration::from_secs(2))?;
        let t0 = Local::now();
        let first = events(&["max_people"]);
        let (admitted, _) = limiter.admit(&first, t0);
        limiter.mark(&admitted, t0);

        let t1 = t0 + TimeDelta::milliseconds(500);
        let both = events(&["max_people", "forbid_phone"]);
        let (admitted, suppressed) = limiter.admit(&both, t1);
        assert_eq!(suppressed, 1);
        assert_eq!(admitted[0].rule_id, "forbid_phone");
        Ok(())
    }

    #[test]
    fn unmarked_batches_do_not_start_cooldown() -> Result<()> {
        let mut limiter = RateLimiter::new(RateLimitPolicy::Global, Duration::from_secs(5))?;
        let t0 = Local::now();
        limiter.mark(&[], t0);
        assert!(limiter.last_event_time().is_none());
        let batch = events(&["a"]);
        assert_eq!(limiter.admit(&batch, t0).0.len(), 1);
        Ok(())
    }

    #[test]
    fn parses_policy_names() -> Result<()> {
        assert_eq!("global".parse::<RateLimitPolicy>()?, RateLimitPolicy::Global);
        assert_eq!("Per-Rule".parse::<RateLimitPolicy>()?, RateLimitPolicy::PerRule);
        assert!("sometimes".parse::<RateLimitPolicy>().is_err());
        assert_eq!(RateLimitPolicy::PerRule.to_string(), "per-rule");
        Ok(())
    }
}
