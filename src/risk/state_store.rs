use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Daily risk counters, persisted as
/// `{date, wins, losses, consecutive_losses, paused_until}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    pub date: NaiveDate,
    pub wins: u32,
    pub losses: u32,
    pub consecutive_losses: u32,
    /// Unix seconds; 0 when not paused.
    #[serde(deserialize_with = "epoch_secs")]
    pub paused_until: i64,
}

impl RiskState {
    pub fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            wins: 0,
            losses: 0,
            consecutive_losses: 0,
            paused_until: 0,
        }
    }
}

/// Accept fractional epoch seconds, truncating to whole seconds.
fn epoch_secs<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let v = f64::deserialize(d)?;
    if !v.is_finite() {
        return Err(serde::de::Error::custom("paused_until is not finite"));
    }
    Ok(v.trunc() as i64)
}

/// JSON file holding the latest `RiskState`.
#[derive(Debug, Clone)]
pub struct RiskStateStore {
    path: PathBuf,
}

impl RiskStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previously saved state. A missing or unreadable file yields `None`.
    pub fn load(&self) -> Option<RiskState> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("No risk state at {} ({e}) — starting fresh", self.path.display());
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Corrupt risk state at {} ({e}) — starting fresh", self.path.display());
                None
            }
        }
    }

    /// Write via a sibling temp file and rename, so a crash never leaves a
    /// half-written record.
    pub fn save(&self, state: &RiskState) -> Result<()> {
        let raw = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }
}
