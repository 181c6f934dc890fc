use crate::models::order::Resolution;
use crate::models::signal::ContractSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub settled_at: DateTime<Utc>,
    pub contract_id: String,
    pub instrument: Option<String>,
    pub side: Option<ContractSide>,
    pub profit: Decimal,
    pub cumulative: Decimal,
}

/// Realised P&L for this process, overall and per instrument.
///
/// Informational only; the risk gate keeps its own persisted counters.
#[derive(Debug, Default)]
pub struct SessionLedger {
    per_instrument: HashMap<String, Decimal>,
    trades: Vec<TradeRecord>,
    total: Decimal,
    wins: u32,
    order_failures: u32,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, resolution: &Resolution) {
        let Some(total) = self.total.checked_add(resolution.profit) else {
            warn!(
                "P&L overflow, contract {} not recorded (profit={})",
                resolution.contract_id, resolution.profit
            );
            return;
        };
        self.total = total;
        if resolution.is_win() {
            self.wins += 1;
        }
        let contract = resolution.contract.as_ref();
        let instrument = contract.map(|c| c.instrument.clone());
        if let Some(name) = &instrument {
            let pnl = self.per_instrument.entry(name.clone()).or_default();
            *pnl = pnl.saturating_add(resolution.profit);
        }
        self.trades.push(TradeRecord {
            settled_at: Utc::now(),
            contract_id: resolution.contract_id.clone(),
            instrument,
            side: contract.map(|c| c.side),
            profit: resolution.profit,
            cumulative: self.total,
        });
    }

    pub fn record_order_failure(&mut self) {
        self.order_failures += 1;
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn instrument_pnl(&self, instrument: &str) -> Decimal {
        self.per_instrument
            .get(instrument)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades.is_empty() {
            0.0
        } else {
            self.wins as f64 / self.trades.len() as f64
        }
    }

    pub fn log_summary(&self) {
        info!(
            "=== SESSION P&L === total={} trades={} win_rate={:.1}% order_failures={}",
            self.total,
            self.trades.len(),
            self.win_rate() * 100.0,
            self.order_failures,
        );
        for (instrument, pnl) in &self.per_instrument {
            info!("  {instrument}: {pnl}");
        }
    }
}
