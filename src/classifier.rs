//! The classifier boundary: an opaque model that ranks labels for one input

use crate::error::ClassifyError;
use crate::input::ModelInput;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A class prediction outputted by a classifier model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new<S: Into<String>>(label: S, confidence: f32) -> Self {
        Prediction {
            label: label.into(),
            confidence,
        }
    }

    /// Confidence as a whole percentage
    pub fn percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}%)", self.label, self.percent())
    }
}

/// A ranked, non-empty list of predictions, most confident first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    predictions: Vec<Prediction>,
}

impl Classification {
    /// Rank the raw output of a classifier, keeping at most `top_n` entries.
    /// Non-finite confidences are dropped and the rest clamped to `[0, 1]`.
    pub fn ranked(predictions: Vec<Prediction>, top_n: usize) -> Result<Self, ClassifyError> {
        let mut predictions: Vec<Prediction> = predictions
            .into_iter()
            .filter(|p| p.confidence.is_finite())
            .map(|p| Prediction {
                confidence: p.confidence.clamp(0.0, 1.0),
                ..p
            })
            .collect();
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        predictions.truncate(top_n);

        match predictions.is_empty() {
            true => Err(ClassifyError::EmptyResult),
            false => Ok(Classification { predictions }),
        }
    }

    /// The most confident prediction. `ranked` never builds an empty
    /// classification, so there always is one.
    pub fn top(&self) -> &Prediction {
        &self.predictions[0]
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.top().fmt(f)
    }
}

/// A loaded model that can be run on converted input. Implementations are
/// shared between workers, so they must tolerate concurrent calls (serializing
/// internally if the backend is not reentrant).
#[cfg_attr(test, mockall::automock)]
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &ModelInput) -> Result<Vec<Prediction>, ClassifyError>;
}

/// Creates the classifier on first use
#[cfg_attr(test, mockall::automock)]
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn Classifier>, ClassifyError>;
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Arc<dyn Classifier>, ClassifyError> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn Classifier>, ClassifyError> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_sorts_and_truncates() {
        let ranked = Classification::ranked(
            vec![
                Prediction::new("dog", 0.05),
                Prediction::new("cat", 0.92),
                Prediction::new("fox", 0.03),
            ],
            2,
        )
        .unwrap();
        assert_eq!(ranked.predictions().len(), 2);
        assert_eq!(ranked.top().label, "cat");
        assert_eq!(ranked.predictions()[1].label, "dog");
    }

    #[test]
    fn test_ranked_empty() {
        assert_eq!(
            Classification::ranked(vec![], 5),
            Err(ClassifyError::EmptyResult)
        );
        assert_eq!(
            Classification::ranked(vec![Prediction::new("nan", f32::NAN)], 5),
            Err(ClassifyError::EmptyResult)
        );
    }

    #[test]
    fn test_ranked_clamps() {
        let ranked = Classification::ranked(vec![Prediction::new("lamp", 1.3)], 5).unwrap();
        assert_eq!(ranked.top().confidence, 1.0);
    }

    #[test]
    fn test_display() {
        let ranked = Classification::ranked(
            vec![Prediction::new("cat", 0.92), Prediction::new("dog", 0.05)],
            5,
        )
        .unwrap();
        assert_eq!(ranked.to_string(), "cat (92%)");
        assert_eq!(Prediction::new("cocoa", 0.996).percent(), 100);
        assert_eq!(Prediction::new("cocoa", 0.004).percent(), 0);
    }
}
