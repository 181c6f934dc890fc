use crate::models::frame::{decimal_field, id_field, Frame, FrameKind};
use crate::models::order::{BuyReceipt, OpenContract, Resolution, UnidentifiedOrder};
use crate::models::signal::FeatureVector;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// How many settled contract ids are remembered for de-duplication.
const RESOLVED_MEMORY: usize = 1024;

/// Matches settlement notifications to purchased contracts and derives the
/// realised profit. Each contract id resolves at most once.
pub struct OutcomeTracker {
    open: HashMap<String, OpenContract>,
    /// Purchases whose acknowledgment carried no id, oldest first.
    unidentified: VecDeque<UnidentifiedOrder>,
    resolved: HashSet<String>,
    resolved_order: VecDeque<String>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self {
            open: HashMap::new(),
            unidentified: VecDeque::new(),
            resolved: HashSet::new(),
            resolved_order: VecDeque::new(),
        }
    }

    /// Start watching a purchase. `features` are the inputs the decision was
    /// made on, kept for the online model update.
    pub fn track(&mut self, receipt: &BuyReceipt, features: Option<FeatureVector>) {
        match &receipt.contract_id {
            Some(id) => {
                debug!("Tracking contract {id} ({} {})", receipt.instrument, receipt.side);
                self.open.insert(
                    id.clone(),
                    OpenContract {
                        contract_id: id.clone(),
                        instrument: receipt.instrument.clone(),
                        side: receipt.side,
                        opened_at: receipt.purchased_at,
                        buy_price: receipt.buy_price,
                        features,
                        resolved_profit: None,
                    },
                );
            }
            None => self.unidentified.push_back(UnidentifiedOrder {
                instrument: receipt.instrument.clone(),
                side: receipt.side,
                opened_at: receipt.purchased_at,
                buy_price: receipt.buy_price,
                features,
            }),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len() + self.unidentified.len()
    }

    /// Ids of purchased contracts still waiting for a settlement.
    pub fn open_ids(&self) -> impl Iterator<Item = &str> {
        self.open.keys().map(String::as_str)
    }

    pub fn get(&self, contract_id: &str) -> Option<&OpenContract> {
        self.open.get(contract_id)
    }

    /// Inspect a notification frame. Returns a resolution the first time a
    /// contract is seen settled with a derivable profit.
    pub fn on_notification(&mut self, frame: &Frame) -> Option<Resolution> {
        if !frame.kind.is_notification() {
            return None;
        }
        let body = frame.payload().filter(|p| p.is_object())?;
        let Some(contract_id) = id_field(body, &["contract_id", "id", "transaction_id"]) else {
            debug!("Notification without contract id ignored");
            return None;
        };
        if self.resolved.contains(&contract_id) {
            debug!("Contract {contract_id} already resolved, ignoring repeat");
            return None;
        }
        self.claim_unidentified(&contract_id);

        if frame.kind == FrameKind::ProposalOpenContract && still_open(body) {
            return None;
        }
        let profit = derive_profit(body)?;

        let mut contract = self.open.remove(&contract_id);
        if let Some(c) = contract.as_mut() {
            c.resolved_profit = Some(profit);
        } else {
            warn!("Settlement for untracked contract {contract_id} (profit={profit})");
        }
        self.remember(contract_id.clone());

        info!(
            "SETTLED contract={contract_id} profit={profit} ({})",
            if profit > Decimal::ZERO { "WIN" } else { "LOSS" }
        );
        Some(Resolution {
            contract_id,
            profit,
            contract,
        })
    }

    /// First notification for an unknown id binds the oldest unidentified purchase.
    fn claim_unidentified(&mut self, contract_id: &str) {
        if self.open.contains_key(contract_id) {
            return;
        }
        if let Some(order) = self.unidentified.pop_front() {
            info!(
                "Contract {contract_id} bound to earlier unidentified {} {} purchase",
                order.instrument, order.side
            );
            self.open
                .insert(contract_id.to_string(), order.identify(contract_id.to_string()));
        }
    }

    fn remember(&mut self, contract_id: String) {
        if self.resolved_order.len() == RESOLVED_MEMORY {
            if let Some(old) = self.resolved_order.pop_front() {
                self.resolved.remove(&old);
            }
        }
        self.resolved.insert(contract_id.clone());
        self.resolved_order.push_back(contract_id);
    }
}

impl Default for OutcomeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// An open-contract update that still reports the contract as live.
fn still_open(body: &Value) -> bool {
    let unsold = match body.get("is_sold") {
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(Value::Bool(b)) => !b,
        _ => false,
    };
    let status_open = body.get("status").and_then(Value::as_str) == Some("open");
    unsold || status_open
}

/// Realised profit in order of preference: explicit `profit`, then
/// `payout - buy_price`, then `sell_price - buy_price`. An overflowing
/// difference leaves the contract unresolved.
pub fn derive_profit(body: &Value) -> Option<Decimal> {
    if let Some(p) = decimal_field(body, "profit") {
        return Some(p);
    }
    let buy = decimal_field(body, "buy_price")?;
    let credit = decimal_field(body, "payout").or_else(|| decimal_field(body, "sell_price"))?;
    let profit = credit.checked_sub(buy);
    if profit.is_none() {
        warn!("Profit overflow: credit={credit} buy_price={buy}");
    }
    profit
}
