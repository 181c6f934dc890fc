use crate::models::signal::{ContractSide, FeatureVector, ModelVerdict};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("expected {expected} features, got {got}")]
    FeatureLength { expected: usize, got: usize },
    #[error("non-finite {0}")]
    NonFinite(&'static str),
    #[error("model io: {0}")]
    Io(#[from] std::io::Error),
    #[error("model format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Raw classifier output, before it is turned into a verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifierOutput {
    /// Native probability that the next move is a CALL.
    CallProbability(f64),
    /// Signed decision score; positive favours CALL.
    Margin(f64),
}

/// Binary CALL/PUT classifier consumed by the decision loop.
pub trait Classifier {
    fn predict(&self, features: &[f64]) -> Result<ClassifierOutput, ModelError>;

    /// Online update with one labelled example. Classifiers that cannot learn
    /// incrementally keep the default no-op.
    fn partial_fit(&mut self, _features: &[f64], _label: ContractSide) -> Result<(), ModelError> {
        Ok(())
    }

    /// Persist the current parameters. Stateless classifiers keep the no-op.
    fn save(&self, _path: &Path) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Logistic regression trained by stochastic gradient descent.
/// Exposes its decision score as a margin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub learning_rate: f64,
    pub updates: u64,
}

impl LogisticModel {
    pub fn new(n_features: usize, learning_rate: f64) -> Self {
        Self {
            weights: vec![0.0; n_features],
            bias: 0.0,
            learning_rate,
            updates: 0,
        }
    }

    /// Fresh model nudged with two seed examples so it can start predicting
    /// before any real outcome has been observed.
    pub fn bootstrap(n_features: usize, learning_rate: f64) -> Self {
        let mut model = Self::new(n_features, learning_rate);
        let seeds = [
            (vec![0.0; n_features], ContractSide::Call),
            (vec![1.0; n_features], ContractSide::Put),
        ];
        for (x, y) in &seeds {
            if let Err(e) = model.partial_fit(x, *y) {
                warn!("Bootstrap seed for {y} skipped: {e}");
            }
        }
        model
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&raw)?;
        if model.weights.iter().any(|w| !w.is_finite()) || !model.bias.is_finite() {
            return Err(ModelError::NonFinite("stored weights"));
        }
        Ok(model)
    }

    fn check(&self, features: &[f64]) -> Result<(), ModelError> {
        if features.len() != self.weights.len() {
            return Err(ModelError::FeatureLength {
                expected: self.weights.len(),
                got: features.len(),
            });
        }
        if features.iter().any(|f| !f.is_finite()) {
            return Err(ModelError::NonFinite("features"));
        }
        Ok(())
    }

    fn score(&self, features: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }
}

impl Classifier for LogisticModel {
    fn predict(&self, features: &[f64]) -> Result<ClassifierOutput, ModelError> {
        self.check(features)?;
        let margin = self.score(features);
        if !margin.is_finite() {
            return Err(ModelError::NonFinite("margin"));
        }
        Ok(ClassifierOutput::Margin(margin))
    }

    fn partial_fit(&mut self, features: &[f64], label: ContractSide) -> Result<(), ModelError> {
        self.check(features)?;
        let target = match label {
            ContractSide::Call => 1.0,
            ContractSide::Put => 0.0,
        };
        let err = sigmoid(self.score(features)) - target;

        let mut next = self.weights.clone();
        for (w, x) in next.iter_mut().zip(features) {
            *w -= self.learning_rate * err * x;
        }
        let next_bias = self.bias - self.learning_rate * err;
        if next.iter().any(|w| !w.is_finite()) || !next_bias.is_finite() {
            return Err(ModelError::NonFinite("updated weights"));
        }
        self.weights = next;
        self.bias = next_bias;
        self.updates += 1;
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Turns classifier output into a verdict, never failing the caller.
///
/// Any classifier fault yields a neutral 0.5 verdict flagged as degraded and
/// logged as a `model_fallback` event.
pub struct ModelAdapter<C = LogisticModel> {
    classifier: C,
    artifact: Option<PathBuf>,
}

impl ModelAdapter<LogisticModel> {
    /// Load the persisted model, or bootstrap a fresh one when the artifact is
    /// missing or unreadable.
    pub fn load_or_bootstrap(path: impl Into<PathBuf>, learning_rate: f64) -> Self {
        let path = path.into();
        let classifier = match LogisticModel::load(&path) {
            Ok(m) => {
                info!(
                    "Model loaded from {} ({} prior updates)",
                    path.display(),
                    m.updates
                );
                m
            }
            Err(e) => {
                warn!(
                    "No usable model at {} ({e}) — bootstrapping incremental model",
                    path.display()
                );
                LogisticModel::bootstrap(FeatureVector::LEN, learning_rate)
            }
        };
        Self {
            classifier,
            artifact: Some(path),
        }
    }
}

impl<C: Classifier> ModelAdapter<C> {
    /// Wrap a classifier without a backing artifact (nothing is persisted).
    pub fn new(classifier: C) -> Self {
        Self {
            classifier,
            artifact: None,
        }
    }

    pub fn with_artifact(classifier: C, path: impl Into<PathBuf>) -> Self {
        Self {
            classifier,
            artifact: Some(path.into()),
        }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn predict(&self, features: &FeatureVector) -> ModelVerdict {
        match self.try_predict(features) {
            Ok(v) => v,
            Err(e) => {
                warn!(event = "model_fallback", "Model predict failed: {e} — neutral verdict");
                ModelVerdict::neutral()
            }
        }
    }

    fn try_predict(&self, features: &FeatureVector) -> Result<ModelVerdict, ModelError> {
        if !features.is_finite() {
            return Err(ModelError::NonFinite("features"));
        }
        let p_call = match self.classifier.predict(features.as_slice())? {
            ClassifierOutput::CallProbability(p) => p,
            ClassifierOutput::Margin(m) => sigmoid(m),
        };
        if !p_call.is_finite() || !(0.0..=1.0).contains(&p_call) {
            return Err(ModelError::NonFinite("probability"));
        }
        let label = if p_call > 0.5 {
            ContractSide::Call
        } else {
            ContractSide::Put
        };
        Ok(ModelVerdict {
            label,
            confidence: p_call.max(1.0 - p_call),
            degraded: false,
        })
    }

    /// Apply one observed outcome and re-persist the artifact. Failures are
    /// logged and otherwise ignored.
    pub fn update(&mut self, features: &FeatureVector, observed: ContractSide) {
        if let Err(e) = self.classifier.partial_fit(features.as_slice(), observed) {
            warn!(event = "model_update_failed", "Model update skipped: {e}");
            return;
        }
        if let Some(path) = &self.artifact {
            if let Err(e) = self.classifier.save(path) {
                error!(event = "persist_failed", "Model save to {} failed: {e}", path.display());
            }
        }
    }
}
