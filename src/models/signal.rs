use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a rise/fall contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractSide {
    Call,
    Put,
}

impl ContractSide {
    /// Wire value for `contract_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractSide::Call => "CALL",
            ContractSide::Put => "PUT",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            ContractSide::Call => ContractSide::Put,
            ContractSide::Put => ContractSide::Call,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CALL" => Some(ContractSide::Call),
            "PUT" => Some(ContractSide::Put),
            _ => None,
        }
    }
}

impl fmt::Display for ContractSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete output of the indicator rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TechnicalSignal {
    Call,
    Put,
    None,
}

impl TechnicalSignal {
    pub fn side(&self) -> Option<ContractSide> {
        match self {
            TechnicalSignal::Call => Some(ContractSide::Call),
            TechnicalSignal::Put => Some(ContractSide::Put),
            TechnicalSignal::None => None,
        }
    }
}

/// Indicator values at one decision point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub upper_band: f64,
    pub middle_band: f64,
    pub lower_band: f64,
    pub last_close: f64,
    pub ema: Option<f64>,
    pub adx: Option<f64>,
    pub signal: TechnicalSignal,
}

impl IndicatorSnapshot {
    pub fn band_width(&self) -> f64 {
        self.upper_band - self.lower_band
    }

    /// Where the last close sits inside the bands: 0 at the lower band, 1 at the upper.
    /// Collapsed bands report the midpoint.
    pub fn band_position(&self) -> f64 {
        let width = self.band_width();
        if width.abs() < f64::EPSILON {
            return 0.5;
        }
        (self.last_close - self.lower_band) / width
    }
}

/// Classifier input: `[rsi, last_close, band_width, band_position]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub Vec<f64>);

impl FeatureVector {
    pub const LEN: usize = 4;

    pub fn from_snapshot(snap: &IndicatorSnapshot) -> Self {
        Self(vec![
            snap.rsi,
            snap.last_close,
            snap.band_width(),
            snap.band_position(),
        ])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Model opinion on the next move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub label: ContractSide,
    /// Probability of `label`, in `[0, 1]`.
    pub confidence: f64,
    /// True when the adapter fell back to a neutral verdict after a model fault.
    pub degraded: bool,
}

impl ModelVerdict {
    pub fn neutral() -> Self {
        Self {
            label: ContractSide::Call,
            confidence: 0.5,
            degraded: true,
        }
    }
}
