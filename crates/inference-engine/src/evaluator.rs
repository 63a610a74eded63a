//! Accuracy Evaluation
//!
//! Runs as its own pass over the dataset so label mapping never lands
//! inside recorded latencies.

use crate::engine::Inference;
use crate::InferenceError;
use dataset::{Label, LabelTable, Sample};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Aggregate prediction accuracy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyResult {
    /// Samples evaluated
    pub total_samples: usize,
    /// Samples whose predicted label matched ground truth
    pub correct_predictions: usize,
    /// Percentage in [0, 100]
    pub accuracy: f64,
}

impl AccuracyResult {
    /// Build from raw counts; an empty pass reports 0%
    pub fn from_counts(total_samples: usize, correct_predictions: usize) -> Self {
        let accuracy = if total_samples == 0 {
            0.0
        } else {
            correct_predictions as f64 / total_samples as f64 * 100.0
        };
        Self {
            total_samples,
            correct_predictions,
            accuracy,
        }
    }
}

/// Index of the largest value, lowest index on ties. NaN entries are ignored.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Classification accuracy over a labeled dataset
pub struct AccuracyEvaluator {
    labels: LabelTable,
}

impl AccuracyEvaluator {
    /// Create an evaluator mapping output indices through `labels`
    pub fn new(labels: LabelTable) -> Self {
        Self { labels }
    }

    /// Map a model output vector to a predicted label
    pub fn predict_label(&self, output: &[f32]) -> Label {
        argmax(output)
            .map(|i| self.labels.label(i))
            .unwrap_or(Label::Unknown)
    }

    /// Run inference over every sample and score the predictions
    pub fn evaluate<I: Inference + ?Sized>(
        &self,
        engine: &mut I,
        samples: &[Sample],
    ) -> Result<AccuracyResult, InferenceError> {
        let mut correct = 0;
        for sample in samples {
            let result = engine.run_inference(sample)?;
            if self.predict_label(&result.output).matches(sample.label()) {
                correct += 1;
            }
        }

        let result = AccuracyResult::from_counts(samples.len(), correct);
        info!(
            "Accuracy: {}/{} correct ({:.2}%)",
            result.correct_predictions, result.total_samples, result.accuracy
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InferenceResult;
    use proptest::prelude::*;

    /// Predicts the true class only on the listed call indices
    struct ScriptedEngine {
        correct_on: Vec<usize>,
        classes: usize,
        calls: usize,
    }

    impl Inference for ScriptedEngine {
        fn run_inference(&mut self, sample: &Sample) -> Result<InferenceResult, InferenceError> {
            let truth = sample.label().index().unwrap_or(0);
            let predicted = if self.correct_on.contains(&self.calls) {
                truth
            } else {
                (truth + 1) % self.classes
            };
            self.calls += 1;

            let mut output = vec![0.0; self.classes];
            output[predicted] = 1.0;
            Ok(InferenceResult {
                duration_ns: 1,
                output,
            })
        }
    }

    fn two_class_samples(truth: &[usize]) -> (LabelTable, Vec<Sample>) {
        let labels = LabelTable::new(vec!["A".into(), "B".into()]);
        let samples = truth
            .iter()
            .map(|&i| Sample::new(vec![0; 3], labels.label(i)))
            .collect();
        (labels, samples)
    }

    #[test]
    fn test_half_correct() {
        let (labels, samples) = two_class_samples(&[0, 1, 0, 1]);
        let mut engine = ScriptedEngine {
            correct_on: vec![0, 2],
            classes: 2,
            calls: 0,
        };

        let result = AccuracyEvaluator::new(labels)
            .evaluate(&mut engine, &samples)
            .unwrap();
        assert_eq!(
            result,
            AccuracyResult {
                total_samples: 4,
                correct_predictions: 2,
                accuracy: 50.0
            }
        );
    }

    #[test]
    fn test_all_correct_and_all_wrong() {
        let (labels, samples) = two_class_samples(&[0, 1, 1]);
        let evaluator = AccuracyEvaluator::new(labels);

        let mut right = ScriptedEngine {
            correct_on: vec![0, 1, 2],
            classes: 2,
            calls: 0,
        };
        assert_eq!(evaluator.evaluate(&mut right, &samples).unwrap().accuracy, 100.0);

        let mut wrong = ScriptedEngine {
            correct_on: vec![],
            classes: 2,
            calls: 0,
        };
        assert_eq!(evaluator.evaluate(&mut wrong, &samples).unwrap().accuracy, 0.0);
    }

    #[test]
    fn test_empty_dataset() {
        let result = AccuracyResult::from_counts(0, 0);
        assert_eq!(result.accuracy, 0.0);
    }

    #[test]
    fn test_argmax_ties_pick_lowest() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f32::NAN, 0.3, f32::NAN]), Some(1));
    }

    #[test]
    fn test_out_of_table_prediction_is_unknown() {
        let evaluator = AccuracyEvaluator::new(LabelTable::new(vec!["A".into()]));
        assert_eq!(evaluator.predict_label(&[0.0, 1.0]), Label::Unknown);
    }

    proptest! {
        #[test]
        fn prop_argmax_is_first_maximum(values in proptest::collection::vec(-1000i32..1000, 1..64)) {
            let floats: Vec<f32> = values.iter().map(|&v| v as f32).collect();
            let idx = argmax(&floats).unwrap();
            let max = floats.iter().cloned().fold(f32::MIN, f32::max);
            prop_assert_eq!(floats[idx], max);
            prop_assert!(floats[..idx].iter().all(|&v| v < max));
        }

        #[test]
        fn prop_accuracy_in_range(total in 0usize..10_000, correct_frac in 0.0f64..=1.0) {
            let correct = (total as f64 * correct_frac) as usize;
            let acc = AccuracyResult::from_counts(total, correct).accuracy;
            prop_assert!((0.0..=100.0).contains(&acc));
        }
    }
}
