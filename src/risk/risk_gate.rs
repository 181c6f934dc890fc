use crate::config::RiskConfig;
use crate::risk::state_store::{RiskState, RiskStateStore};
use chrono::{DateTime, Local, TimeZone};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Active,
    Paused { until: i64 },
}

/// Why the gate entered a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    ConsecutiveLosses,
    DailyLossLimit,
    DailyWinLimit,
}

/// Daily risk budget: counts wins and losses, pauses admission after adverse
/// streaks or once a daily cap is hit, and resets at local midnight.
///
/// Every mutation is persisted immediately. Persistence failures are logged
/// and retried on the next mutation.
pub struct RiskGate {
    config: RiskConfig,
    state: RiskState,
    store: Option<RiskStateStore>,
}

impl RiskGate {
    /// Restore from the configured state file, rolling over if the stored
    /// date is not today.
    pub fn load(config: RiskConfig) -> Self {
        let store = RiskStateStore::new(&config.state_path);
        let today = Local::now().date_naive();
        let state = store.load().unwrap_or_else(|| RiskState::fresh(today));
        let mut gate = Self {
            config,
            state,
            store: Some(store),
        };
        gate.rollover(Local::now());
        gate
    }

    /// Gate over an explicit state, without persistence.
    pub fn in_memory(config: RiskConfig, state: RiskState) -> Self {
        Self {
            config,
            state,
            store: None,
        }
    }

    pub fn with_store(config: RiskConfig, state: RiskState, store: RiskStateStore) -> Self {
        Self {
            config,
            state,
            store: Some(store),
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn admit(&mut self) -> bool {
        self.admit_at(Local::now())
    }

    pub fn report_outcome(&mut self, profit: Decimal) {
        self.report_outcome_at(profit, Local::now())
    }

    pub fn report_order_failure(&mut self) {
        self.report_order_failure_at(Local::now())
    }

    pub fn status_at<Tz: TimeZone>(&self, now: DateTime<Tz>) -> GateStatus {
        if self.state.paused_until > now.timestamp() {
            GateStatus::Paused {
                until: self.state.paused_until,
            }
        } else {
            GateStatus::Active
        }
    }

    /// May a new order be placed at `now`?
    ///
    /// A reached daily cap (re)enters the cooldown on the spot, so the gate
    /// stays closed for the rest of the day.
    pub fn admit_at<Tz: TimeZone>(&mut self, now: DateTime<Tz>) -> bool {
        self.rollover(now.clone());

        if let GateStatus::Paused { until } = self.status_at(now.clone()) {
            info!(
                "Risk gate paused for another {}s",
                until - now.timestamp()
            );
            return false;
        }

        let reason = if self.state.losses >= self.config.daily_loss_limit {
            Some(PauseReason::DailyLossLimit)
        } else if self.state.wins >= self.config.daily_win_limit {
            Some(PauseReason::DailyWinLimit)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.pause(reason, now);
                self.persist();
                false
            }
            None => true,
        }
    }

    /// Record a settled trade. Positive profit is a win; zero or negative is a loss.
    pub fn report_outcome_at<Tz: TimeZone>(&mut self, profit: Decimal, now: DateTime<Tz>) {
        self.rollover(now.clone());
        if profit > Decimal::ZERO {
            self.state.wins += 1;
            self.state.consecutive_losses = 0;
            info!("Risk: WIN profit={profit} (wins={})", self.state.wins);
        } else {
            self.record_loss();
            info!(
                "Risk: LOSS profit={profit} (losses={} streak={})",
                self.state.losses, self.state.consecutive_losses
            );
        }
        self.evaluate(now);
        self.persist();
    }

    /// A rejected or timed-out purchase counts against the budget like a loss.
    pub fn report_order_failure_at<Tz: TimeZone>(&mut self, now: DateTime<Tz>) {
        self.rollover(now.clone());
        self.record_loss();
        warn!(
            "Risk: order failure counted as loss (losses={} streak={})",
            self.state.losses, self.state.consecutive_losses
        );
        self.evaluate(now);
        self.persist();
    }

    fn record_loss(&mut self) {
        self.state.losses += 1;
        self.state.consecutive_losses += 1;
    }

    fn evaluate<Tz: TimeZone>(&mut self, now: DateTime<Tz>) {
        let reason = if self.state.consecutive_losses >= self.config.consecutive_loss_pause {
            Some(PauseReason::ConsecutiveLosses)
        } else if self.state.losses >= self.config.daily_loss_limit {
            Some(PauseReason::DailyLossLimit)
        } else if self.state.wins >= self.config.daily_win_limit {
            Some(PauseReason::DailyWinLimit)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.pause(reason, now);
        }
    }

    fn pause<Tz: TimeZone>(&mut self, reason: PauseReason, now: DateTime<Tz>) {
        self.state.paused_until = now.timestamp() + self.config.pause_duration_secs;
        warn!(
            "RISK: {reason:?} — pausing admissions for {}s (wins={} losses={} streak={})",
            self.config.pause_duration_secs,
            self.state.wins,
            self.state.losses,
            self.state.consecutive_losses
        );
    }

    /// Hard reset of all counters when the local date has moved on.
    fn rollover<Tz: TimeZone>(&mut self, now: DateTime<Tz>) {
        let today = now.with_timezone(&Local).date_naive();
        if self.state.date != today {
            info!("Risk: new trading day {today} — counters reset");
            self.state = RiskState::fresh(today);
            self.persist();
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.state) {
                error!(event = "persist_failed", "Risk state save failed: {e:#}");
            }
        }
    }
}
