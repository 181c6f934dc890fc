use crate::models::candle::Tick;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Message kinds the engine distinguishes on the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Authorize,
    Tick,
    Proposal,
    Buy,
    ProposalOpenContract,
    Sell,
    Transaction,
    Error,
    Other,
}

impl FrameKind {
    /// Key under which the broker nests the payload for this kind.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            FrameKind::Authorize => Some("authorize"),
            FrameKind::Tick => Some("tick"),
            FrameKind::Proposal => Some("proposal"),
            FrameKind::Buy => Some("buy"),
            FrameKind::ProposalOpenContract => Some("proposal_open_contract"),
            FrameKind::Sell => Some("sell"),
            FrameKind::Transaction => Some("transaction"),
            FrameKind::Error => Some("error"),
            FrameKind::Other => None,
        }
    }

    fn from_key(key: &str) -> Self {
        match key {
            "authorize" => FrameKind::Authorize,
            "tick" | "ticks" => FrameKind::Tick,
            "proposal" => FrameKind::Proposal,
            "buy" => FrameKind::Buy,
            "proposal_open_contract" => FrameKind::ProposalOpenContract,
            "sell" => FrameKind::Sell,
            "transaction" => FrameKind::Transaction,
            _ => FrameKind::Other,
        }
    }

    /// Kinds that may carry a settled trade result.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            FrameKind::ProposalOpenContract | FrameKind::Sell | FrameKind::Transaction
        )
    }
}

const PAYLOAD_KEYS: [&str; 7] = [
    "tick",
    "proposal",
    "buy",
    "proposal_open_contract",
    "sell",
    "transaction",
    "authorize",
];

/// Error object the broker returns in place of a response payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerError {
    pub code: String,
    pub message: String,
}

/// One decoded JSON frame from the broker.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    /// The `msg_type` echoed by the broker, if any.
    pub msg_type: Option<String>,
    pub req_id: Option<u64>,
    pub body: Value,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let body: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(body))
    }

    pub fn from_value(body: Value) -> Self {
        let msg_type = body
            .get("msg_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        let req_id = body.get("req_id").and_then(Value::as_u64);

        let kind = if is_present(body.get("error")) {
            FrameKind::Error
        } else if let Some(mt) = msg_type.as_deref() {
            match FrameKind::from_key(mt) {
                FrameKind::Other => Self::kind_from_keys(&body),
                k => k,
            }
        } else {
            Self::kind_from_keys(&body)
        };

        Self {
            kind,
            msg_type,
            req_id,
            body,
        }
    }

    fn kind_from_keys(body: &Value) -> FrameKind {
        PAYLOAD_KEYS
            .iter()
            .find(|k| is_present(body.get(**k)))
            .map(|k| FrameKind::from_key(k))
            .unwrap_or(FrameKind::Other)
    }

    /// Nested payload object for this frame's kind.
    pub fn payload(&self) -> Option<&Value> {
        self.kind.key().and_then(|k| self.body.get(k))
    }

    pub fn error(&self) -> Option<BrokerError> {
        if self.kind != FrameKind::Error {
            return None;
        }
        let err = self.body.get("error")?;
        Some(BrokerError {
            code: err
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
        })
    }

    /// Decode a tick push. Quotes may arrive as numbers or numeric strings.
    pub fn tick(&self) -> Option<Tick> {
        if self.kind != FrameKind::Tick {
            return None;
        }
        let t = self.body.get("tick")?;
        let instrument = t.get("symbol")?.as_str()?.to_string();
        let epoch = t.get("epoch").and_then(as_i64)?;
        let price = t.get("quote").and_then(as_f64)?;
        Some(Tick {
            instrument,
            epoch,
            price,
        })
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers count as absent.
fn is_present(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a money field without going through binary floating point.
pub fn decimal_field(obj: &Value, key: &str) -> Option<Decimal> {
    let raw = match obj.get(key)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

/// First identifier found under `keys`, normalised to a string.
pub fn id_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_tick() {
        let f = Frame::parse(
            r#"{"msg_type":"tick","tick":{"symbol":"frxEURUSD","epoch":1700000001,"quote":1.08412}}"#,
        )
        .unwrap();
        assert_eq!(f.kind, FrameKind::Tick);
        let t = f.tick().unwrap();
        assert_eq!(t.instrument, "frxEURUSD");
        assert_eq!(t.epoch, 1_700_000_001);
        assert_eq!(t.price, 1.08412);
    }

    #[test]
    fn test_error_wins_over_msg_type() {
        let f = Frame::parse(
            r#"{"msg_type":"buy","req_id":7,"error":{"code":"InsufficientBalance","message":"no funds"}}"#,
        )
        .unwrap();
        assert_eq!(f.kind, FrameKind::Error);
        assert_eq!(f.req_id, Some(7));
        assert_eq!(f.msg_type.as_deref(), Some("buy"));
        let e = f.error().unwrap();
        assert_eq!(e.code, "InsufficientBalance");
        assert_eq!(e.message, "no funds");
    }

    #[test]
    fn test_kind_from_keys_without_msg_type() {
        let f = Frame::from_value(json!({"proposal": {"id": "abc"}}));
        assert_eq!(f.kind, FrameKind::Proposal);
        let f = Frame::from_value(json!({"sell": {"contract_id": 1}}));
        assert_eq!(f.kind, FrameKind::Sell);
        assert!(f.kind.is_notification());
        let f = Frame::from_value(json!({"ping": "pong"}));
        assert_eq!(f.kind, FrameKind::Other);
    }

    #[test]
    fn test_malformed_is_error() {
        assert!(Frame::parse("not json").is_err());
    }

    #[test]
    fn test_decimal_field_number_and_string() {
        let obj = json!({"a": 0.1, "b": "-0.95", "c": 1e-3, "d": true});
        assert_eq!(decimal_field(&obj, "a"), Some(dec!(0.1)));
        assert_eq!(decimal_field(&obj, "b"), Some(dec!(-0.95)));
        assert_eq!(decimal_field(&obj, "c"), Some(dec!(0.001)));
        assert_eq!(decimal_field(&obj, "d"), None);
        assert_eq!(decimal_field(&obj, "missing"), None);
    }

    #[test]
    fn test_id_field_precedence() {
        let obj = json!({"id": "tx-9", "contract_id": 12345});
        assert_eq!(
            id_field(&obj, &["contract_id", "id"]),
            Some("12345".to_string())
        );
        assert_eq!(id_field(&obj, &["transaction_id", "id"]), Some("tx-9".to_string()));
        assert_eq!(id_field(&obj, &["nope"]), None);
    }
}
