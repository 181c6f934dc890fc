use crate::feeds::protocol::{FrameTransport, ProtocolClient, ProtocolError};
use crate::models::frame::{decimal_field, id_field, FrameKind};
use crate::models::order::{BuyReceipt, ContractTerms, PendingOrder, Proposal};
use crate::models::signal::ContractSide;
use crate::telemetry::latency::RoundTripLatency;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How one placement attempt ended.
#[derive(Debug)]
pub enum Placement {
    /// No quote was obtained; nothing was spent.
    ProposalFailed(ProtocolError),
    /// A quote was obtained but the purchase was rejected or not acknowledged.
    BuyFailed(ProtocolError),
    Placed(BuyReceipt),
}

/// Turns a decided side into a purchased contract via the proposal then buy
/// exchange, each bounded by the response timeout.
///
/// At most one buy is in flight: `place` holds `&mut self` across the whole
/// exchange and the pending order is cleared whichever way it ends.
pub struct OrderExecutor {
    terms: ContractTerms,
    timeout: Duration,
    pending: Option<PendingOrder>,
    latency: RoundTripLatency,
}

impl OrderExecutor {
    pub fn new(terms: ContractTerms, timeout: Duration, latency: RoundTripLatency) -> Self {
        Self {
            terms,
            timeout,
            pending: None,
            latency,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> Option<&PendingOrder> {
        self.pending.as_ref()
    }

    pub fn latency(&self) -> &RoundTripLatency {
        &self.latency
    }

    /// Full placement: quote, purchase, then subscribe to the contract's
    /// settlement stream.
    pub async fn place<T: FrameTransport>(
        &mut self,
        client: &mut ProtocolClient<T>,
        instrument: &str,
        side: ContractSide,
    ) -> Placement {
        let proposal = match self.request_proposal(client, instrument, side).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Proposal for {instrument} {side} failed: {e}");
                return Placement::ProposalFailed(e);
            }
        };

        let receipt = match self.buy(client, &proposal).await {
            Ok(r) => r,
            Err(e) => {
                error!("Buy of {instrument} {side} (proposal {}) failed: {e}", proposal.id);
                return Placement::BuyFailed(e);
            }
        };

        if let Some(id) = &receipt.contract_id {
            if let Err(e) = self.watch_contract(client, id).await {
                warn!("Could not subscribe to contract {id}: {e}");
            }
        }
        Placement::Placed(receipt)
    }

    pub async fn request_proposal<T: FrameTransport>(
        &mut self,
        client: &mut ProtocolClient<T>,
        instrument: &str,
        side: ContractSide,
    ) -> Result<Proposal, ProtocolError> {
        let request = self.proposal_request(instrument, side);
        let started = Instant::now();
        let frame = client
            .request(request, FrameKind::Proposal, started + self.timeout)
            .await?;
        self.latency.observe("proposal", started.elapsed());

        let body = frame.payload().ok_or(ProtocolError::Malformed("proposal"))?;
        let id = id_field(body, &["id"]).ok_or(ProtocolError::Malformed("proposal"))?;
        let proposal = Proposal {
            id,
            instrument: instrument.to_string(),
            side,
            ask_price: decimal_field(body, "ask_price"),
            payout: decimal_field(body, "payout"),
        };
        debug!(
            "Proposal {} for {instrument} {side}: ask={:?} payout={:?}",
            proposal.id, proposal.ask_price, proposal.payout
        );
        Ok(proposal)
    }

    /// Purchase an accepted proposal. The pending order lives only for the
    /// duration of this call.
    pub async fn buy<T: FrameTransport>(
        &mut self,
        client: &mut ProtocolClient<T>,
        proposal: &Proposal,
    ) -> Result<BuyReceipt, ProtocolError> {
        self.pending = Some(PendingOrder {
            proposal_id: proposal.id.clone(),
            instrument: proposal.instrument.clone(),
            side: proposal.side,
            requested_at: Utc::now(),
        });
        let result = self.exchange_buy(client, proposal).await;
        self.pending = None;
        result
    }

    async fn exchange_buy<T: FrameTransport>(
        &self,
        client: &mut ProtocolClient<T>,
        proposal: &Proposal,
    ) -> Result<BuyReceipt, ProtocolError> {
        let mut request = Map::new();
        request.insert("buy".into(), Value::from(proposal.id.clone()));
        if let Some(price) = proposal.ask_price {
            request.insert("price".into(), money(price));
        }

        let started = Instant::now();
        let frame = client
            .request(request, FrameKind::Buy, started + self.timeout)
            .await?;
        self.latency.observe("buy", started.elapsed());

        // Some acknowledgments carry ids at the top level rather than nested
        let body = frame
            .payload()
            .filter(|p| p.is_object())
            .unwrap_or(&frame.body);
        let contract_id = id_field(body, &["contract_id", "transaction_id", "id"]);
        let receipt = BuyReceipt {
            contract_id,
            instrument: proposal.instrument.clone(),
            side: proposal.side,
            buy_price: decimal_field(body, "buy_price").or(proposal.ask_price),
            payout: decimal_field(body, "payout").or(proposal.payout),
            purchased_at: Utc::now(),
        };
        match &receipt.contract_id {
            Some(id) => info!(
                "BOUGHT {} {} contract={id} price={:?}",
                receipt.instrument, receipt.side, receipt.buy_price
            ),
            None => warn!(
                "BOUGHT {} {} but acknowledgment carried no contract id",
                receipt.instrument, receipt.side
            ),
        }
        Ok(receipt)
    }

    /// Ask the broker to stream status updates for a purchased contract.
    /// Subscribe to settlement updates for a purchased contract.
    pub async fn watch_contract<T: FrameTransport>(
        &self,
        client: &mut ProtocolClient<T>,
        contract_id: &str,
    ) -> Result<(), ProtocolError> {
        let id = contract_id
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(contract_id));
        let request = json!({
            "proposal_open_contract": 1,
            "contract_id": id,
            "subscribe": 1,
        });
        if let Value::Object(map) = request {
            client.send(map).await?;
        }
        Ok(())
    }

    fn proposal_request(&self, instrument: &str, side: ContractSide) -> Map<String, Value> {
        let mut request = Map::new();
        request.insert("proposal".into(), Value::from(1));
        request.insert("amount".into(), money(self.terms.amount));
        request.insert("basis".into(), Value::from(self.terms.basis.clone()));
        request.insert("contract_type".into(), Value::from(side.as_str()));
        request.insert("currency".into(), Value::from(self.terms.currency.clone()));
        request.insert("symbol".into(), Value::from(instrument));
        request.insert("duration".into(), Value::from(self.terms.duration));
        request.insert(
            "duration_unit".into(),
            Value::from(self.terms.duration_unit.clone()),
        );
        request.insert("subscribe".into(), Value::from(0));
        request
    }
}

/// Money goes on the wire as a JSON number.
fn money(d: Decimal) -> Value {
    d.to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
