use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// Which annotations a detector should draw onto the frame.
///
/// Parsed from the detectnet-style flag string (`"boxes,labels,conf"`).
/// Drawing itself belongs to the detector; the monitor only forwards the flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayConfig {
    pub boxes: bool,
    pub labels: bool,
    pub confidence: bool,
    pub lines: bool,
}

impl OverlayConfig {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !(self.boxes || self.labels || self.confidence || self.lines)
    }
}

impl FromStr for OverlayConfig {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut cfg = OverlayConfig::default();
        for flag in value
            .split(',')
            .map(|entry| entry.trim().to_ascii_lowercase())
            .filter(|entry| !entry.is_empty())
        {
            match flag.as_str() {
                "box" | "boxes" => cfg.boxes = true,
                "label" | "labels" => cfg.labels = true,
                "conf" | "confidence" => cfg.confidence = true,
                "line" | "lines" => cfg.lines = true,
                "none" => {}
                other => return Err(anyhow!("unknown overlay flag '{}'", other)),
            }
        }
        Ok(cfg)
    }
}

impl fmt::Display for OverlayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let flags: Vec<&str> = [
            (self.boxes, "box"),
            (self.labels, "labels"),
            (self.confidence, "conf"),
            (self.lines, "lines"),
        ]
        .iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, name)| *name)
        .collect();
        f.write_str(&flags.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detectnet_flag_strings() -> Result<()> {
        let cfg: OverlayConfig = "boxes,labels,conf".parse()?;
        assert!(cfg.boxes && cfg.labels && cfg.confidence);
        assert!(!cfg.lines);
        assert_eq!(cfg.to_string(), "box,labels,conf");

        let cfg: OverlayConfig = " Box , Lines ".parse()?;
        assert!(cfg.boxes && cfg.lines);
        assert!(!cfg.labels);
        Ok(())
    }

    #[test]
    fn none_disables_everything() -> Result<()> {
        let cfg: OverlayConfig = "none".parse()?;
        assert!(cfg.is_empty());
        assert_eq!(cfg.to_string(), "none");
        assert!("".parse::<OverlayConfig>()?.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!("boxes,sparkles".parse::<OverlayConfig>().is_err());
    }
}
