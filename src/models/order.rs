use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::{ContractSide, FeatureVector};

/// Contract terms sent with every proposal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractTerms {
    pub amount: Decimal,
    pub basis: String,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: String,
}

/// Broker quote accepted for purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub instrument: String,
    pub side: ContractSide,
    pub ask_price: Option<Decimal>,
    pub payout: Option<Decimal>,
}

/// A proposal that has been accepted and awaits its buy response.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub proposal_id: String,
    pub instrument: String,
    pub side: ContractSide,
    pub requested_at: DateTime<Utc>,
}

/// Acknowledgment of a successful buy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyReceipt {
    /// Absent when the acknowledgment shape carried no recognisable id.
    pub contract_id: Option<String>,
    pub instrument: String,
    pub side: ContractSide,
    pub buy_price: Option<Decimal>,
    pub payout: Option<Decimal>,
    pub purchased_at: DateTime<Utc>,
}

/// A purchased contract awaiting settlement.
#[derive(Debug, Clone)]
pub struct OpenContract {
    pub contract_id: String,
    pub instrument: String,
    pub side: ContractSide,
    pub opened_at: DateTime<Utc>,
    pub buy_price: Option<Decimal>,
    /// Features at the decision point, used for the online model update.
    pub features: Option<FeatureVector>,
    pub resolved_profit: Option<Decimal>,
}

/// A purchase that has not yet been tied to a contract id.
#[derive(Debug, Clone)]
pub struct UnidentifiedOrder {
    pub instrument: String,
    pub side: ContractSide,
    pub opened_at: DateTime<Utc>,
    pub buy_price: Option<Decimal>,
    pub features: Option<FeatureVector>,
}

impl UnidentifiedOrder {
    pub fn identify(self, contract_id: String) -> OpenContract {
        OpenContract {
            contract_id,
            instrument: self.instrument,
            side: self.side,
            opened_at: self.opened_at,
            buy_price: self.buy_price,
            features: self.features,
            resolved_profit: None,
        }
    }
}

/// Realised result of one contract.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub contract_id: String,
    pub profit: Decimal,
    /// The tracked contract, when this process placed it.
    pub contract: Option<OpenContract>,
}

impl Resolution {
    pub fn is_win(&self) -> bool {
        self.profit > Decimal::ZERO
    }
}
