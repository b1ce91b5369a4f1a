//! Name category prediction from structural features.
//!
//! Features never look at the symbol's name, only at its shape (arity, return kind) and at
//! how it is wired into the unit (calls it makes, references it receives).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bytecode::descriptor::ValueKind;
use crate::db::PipelineConfig;
use crate::error::PredictionUnavailable;

pub const FEATURE_DIM: usize = 4;

const TRAIN_EPOCHS: usize = 2000;
const LEARNING_RATE: f64 = 0.5;
const L2: f64 = 1e-3;

/// Structural feature vector of a field or method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    pub arity: f64,
    pub return_kind: f64,
    pub outbound_calls: f64,
    pub inbound_refs: f64,
}

impl Features {
    /// Build features from raw counts; counts are `ln(1 + x)` scaled.
    pub fn from_counts(arity: usize, ret: ValueKind, outbound: usize, inbound: usize) -> Self {
        Self {
            arity: (arity as f64).ln_1p(),
            return_kind: ret.indicator(),
            outbound_calls: (outbound as f64).ln_1p(),
            inbound_refs: (inbound as f64).ln_1p(),
        }
    }

    pub fn to_array(self) -> [f64; FEATURE_DIM] {
        [self.arity, self.return_kind, self.outbound_calls, self.inbound_refs]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Attack,
    Calculate,
    Update,
    Get,
    Is,
}

impl Category {
    pub const ALL: [Category; 5] =
        [Category::Attack, Category::Calculate, Category::Update, Category::Get, Category::Is];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Attack => "attack",
            Category::Calculate => "calculate",
            Category::Update => "update",
            Category::Get => "get",
            Category::Is => "is",
        }
    }

    pub fn method_prefix(self) -> &'static str {
        self.as_str()
    }

    pub fn field_prefix(self) -> &'static str {
        match self {
            Category::Is => "flag",
            Category::Get => "value",
            _ => "field",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub category: Category,
    pub confidence: f64,
}

/// A swappable name classifier.
///
/// Inference is a pure function of the model and the features and cannot fail; `None`
/// means the predictor has no opinion and default naming applies.
pub trait NamePredictor: Send + Sync {
    fn name(&self) -> &str;
    fn predict(&self, features: &Features) -> Option<Prediction>;
}

/// Predictor used when ML-assisted naming is disabled or unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPredictor;

impl NamePredictor for NoopPredictor {
    fn name(&self) -> &str {
        "noop"
    }

    fn predict(&self, _features: &Features) -> Option<Prediction> {
        None
    }
}

/// On-disk model format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelFile {
    pub categories: Vec<Category>,
    /// One row per category: `FEATURE_DIM` weights followed by the bias.
    pub weights: Vec<Vec<f64>>,
}

/// Multinomial logistic regression over [`Features`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticPredictor {
    categories: Vec<Category>,
    weights: Vec<[f64; FEATURE_DIM + 1]>,
}

/// (arity, return kind, outbound calls, inbound refs) → category.
const TRAINING_SET: &[(usize, ValueKind, usize, usize, Category)] = &[
    (1, ValueKind::Void, 4, 1, Category::Attack),
    (2, ValueKind::Void, 6, 1, Category::Attack),
    (1, ValueKind::Void, 3, 0, Category::Attack),
    (2, ValueKind::Primitive, 0, 2, Category::Calculate),
    (3, ValueKind::Primitive, 1, 3, Category::Calculate),
    (1, ValueKind::Primitive, 0, 1, Category::Calculate),
    (0, ValueKind::Void, 1, 6, Category::Update),
    (0, ValueKind::Void, 2, 4, Category::Update),
    (1, ValueKind::Void, 0, 5, Category::Update),
    (0, ValueKind::Void, 0, 1, Category::Update),
    (0, ValueKind::Reference, 0, 3, Category::Get),
    (0, ValueKind::Primitive, 0, 4, Category::Get),
    (0, ValueKind::Reference, 1, 2, Category::Get),
    (0, ValueKind::Boolean, 0, 2, Category::Is),
    (1, ValueKind::Boolean, 1, 1, Category::Is),
    (0, ValueKind::Boolean, 1, 3, Category::Is),
];

impl LogisticPredictor {
    /// Train on the built-in sample set. Deterministic: zero initialisation, full-batch
    /// gradient descent, fixed epoch count.
    pub fn train_default() -> Result<Self, PredictionUnavailable> {
        let samples: Vec<([f64; FEATURE_DIM], usize)> = TRAINING_SET
            .iter()
            .map(|&(arity, ret, out, inb, cat)| {
                let class = Category::ALL.iter().position(|c| *c == cat).unwrap_or(0);
                (Features::from_counts(arity, ret, out, inb).to_array(), class)
            })
            .collect();
        Self::train(Category::ALL.to_vec(), &samples)
    }

    pub fn train(
        categories: Vec<Category>,
        samples: &[([f64; FEATURE_DIM], usize)],
    ) -> Result<Self, PredictionUnavailable> {
        if categories.is_empty() || samples.is_empty() {
            return Err(PredictionUnavailable("empty training set".into()));
        }
        if samples.iter().any(|(_, class)| *class >= categories.len()) {
            return Err(PredictionUnavailable("training label out of range".into()));
        }
        let k = categories.len();
        let n = samples.len() as f64;
        let mut weights = vec![[0.0; FEATURE_DIM + 1]; k];

        for _ in 0..TRAIN_EPOCHS {
            let mut grad = vec![[0.0; FEATURE_DIM + 1]; k];
            for (x, class) in samples {
                let probs = softmax(&weights, x);
                for (c, g) in grad.iter_mut().enumerate() {
                    let err = probs[c] - if c == *class { 1.0 } else { 0.0 };
                    for d in 0..FEATURE_DIM {
                        g[d] += err * x[d];
                    }
                    g[FEATURE_DIM] += err;
                }
            }
            for (w, g) in weights.iter_mut().zip(&grad) {
                for d in 0..=FEATURE_DIM {
                    let reg = if d < FEATURE_DIM { L2 * w[d] } else { 0.0 };
                    w[d] -= LEARNING_RATE * (g[d] / n + reg);
                }
            }
        }

        let model = Self { categories, weights };
        model.validate()?;
        Ok(model)
    }

    pub fn from_model(model: ModelFile) -> Result<Self, PredictionUnavailable> {
        if model.categories.is_empty() {
            return Err(PredictionUnavailable("model has no categories".into()));
        }
        if model.categories.len() != model.weights.len() {
            return Err(PredictionUnavailable(format!(
                "model has {} categories but {} weight rows",
                model.categories.len(),
                model.weights.len()
            )));
        }
        let mut weights = Vec::with_capacity(model.weights.len());
        for (i, row) in model.weights.iter().enumerate() {
            let row: [f64; FEATURE_DIM + 1] = row.as_slice().try_into().map_err(|_| {
                PredictionUnavailable(format!(
                    "weight row {i} has {} values, expected {}",
                    row.len(),
                    FEATURE_DIM + 1
                ))
            })?;
            weights.push(row);
        }
        let predictor = Self { categories: model.categories, weights };
        predictor.validate()?;
        Ok(predictor)
    }

    /// Load a JSON model file.
    pub fn load(path: &Path) -> Result<Self, PredictionUnavailable> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PredictionUnavailable(format!("cannot read model {}: {e}", path.display()))
        })?;
        let model: ModelFile = serde_json::from_str(&text).map_err(|e| {
            PredictionUnavailable(format!("cannot parse model {}: {e}", path.display()))
        })?;
        Self::from_model(model)
    }

    pub fn to_model(&self) -> ModelFile {
        ModelFile {
            categories: self.categories.clone(),
            weights: self.weights.iter().map(|w| w.to_vec()).collect(),
        }
    }

    fn validate(&self) -> Result<(), PredictionUnavailable> {
        if self.weights.iter().flatten().any(|w| !w.is_finite()) {
            return Err(PredictionUnavailable("model contains non-finite weights".into()));
        }
        Ok(())
    }
}

impl NamePredictor for LogisticPredictor {
    fn name(&self) -> &str {
        "logistic"
    }

    fn predict(&self, features: &Features) -> Option<Prediction> {
        let probs = softmax(&self.weights, &features.to_array());
        let mut best = 0;
        for (i, p) in probs.iter().enumerate() {
            if *p > probs[best] {
                best = i;
            }
        }
        Some(Prediction { category: self.categories[best], confidence: probs[best] })
    }
}

fn softmax(weights: &[[f64; FEATURE_DIM + 1]], x: &[f64; FEATURE_DIM]) -> Vec<f64> {
    let logits: Vec<f64> = weights
        .iter()
        .map(|w| w[FEATURE_DIM] + (0..FEATURE_DIM).map(|d| w[d] * x[d]).sum::<f64>())
        .collect();
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Build the predictor a run should use.
///
/// `Ok(NoopPredictor)` when ML is disabled; `Err` when it is enabled but cannot be
/// initialised, in which case the caller falls back to [`NoopPredictor`] and logs once.
pub fn init_predictor(
    config: &PipelineConfig,
    model_path: Option<&Path>,
) -> Result<Box<dyn NamePredictor>, PredictionUnavailable> {
    if !config.enable_ml {
        return Ok(Box::new(NoopPredictor));
    }
    let predictor = match model_path {
        Some(path) => LogisticPredictor::load(path)?,
        None => LogisticPredictor::train_default()?,
    };
    Ok(Box::new(predictor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trained_model_separates_shapes() {
        let model = LogisticPredictor::train_default().unwrap();
        let is = model.predict(&Features::from_counts(0, ValueKind::Boolean, 0, 2)).unwrap();
        assert_eq!(is.category, Category::Is);
        let attack = model.predict(&Features::from_counts(2, ValueKind::Void, 6, 1)).unwrap();
        assert_eq!(attack.category, Category::Attack);
        assert!(attack.confidence > 0.2 && attack.confidence <= 1.0);
    }

    #[test]
    fn training_is_deterministic() {
        let a = LogisticPredictor::train_default().unwrap();
        let b = LogisticPredictor::train_default().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn model_with_wrong_dimensions_is_rejected() {
        let model = ModelFile { categories: vec![Category::Is], weights: vec![vec![1.0, 2.0]] };
        assert!(LogisticPredictor::from_model(model).is_err());

        let model = ModelFile {
            categories: vec![Category::Is, Category::Get],
            weights: vec![vec![0.0; FEATURE_DIM + 1]],
        };
        assert!(LogisticPredictor::from_model(model).is_err());
    }

    #[test]
    fn model_json_round_trips() {
        let model = LogisticPredictor::train_default().unwrap();
        let json = serde_json::to_string(&model.to_model()).unwrap();
        let back: ModelFile = serde_json::from_str(&json).unwrap();
        assert_eq!(LogisticPredictor::from_model(back).unwrap(), model);
    }

    #[test]
    fn disabled_ml_yields_noop() {
        let config = PipelineConfig { enable_ml: false, ..PipelineConfig::default() };
        let predictor = init_predictor(&config, None).unwrap();
        assert_eq!(predictor.name(), "noop");
    }
}
