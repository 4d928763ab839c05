//! # Emotion Post-Processing
//!
//! Turns the raw classifier scores for a batch into `EmotionPrediction`s:
//! a per-row softmax, the fixed label mapping and the dominant label.
//! `EmotionAnalyzer` is the immutable context the HTTP handlers are built
//! around; it owns the loaded classifier behind the `SequenceClassifier`
//! trait so tests can swap in a stub.

use std::sync::Arc;

use ndarray::{Array2, ArrayView1};
use ndarray_stats::QuantileExt;

use crate::error::InferenceError;
use crate::model::SequenceClassifier;
use crate::types::{EmotionPrediction, EmotionScores};

pub const NUM_LABELS: usize = 6;

/// Output order of the classification head.
pub const EMOTION_LABELS: [&str; NUM_LABELS] =
    ["sadness", "joy", "love", "anger", "fear", "surprise"];

/// Row-wise softmax. Each row is shifted by its maximum before exponentiation.
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }
    probs
}

/// Index of the largest score; the earliest index wins on exact ties.
pub fn dominant_index(scores: ArrayView1<'_, f32>) -> Option<usize> {
    scores.argmax().ok()
}

fn to_prediction(
    index: usize,
    text: String,
    probs: ArrayView1<'_, f32>,
) -> Result<EmotionPrediction, InferenceError> {
    if probs.iter().any(|p| !p.is_finite()) {
        return Err(InferenceError::NonFinite { index });
    }
    let dominant = dominant_index(probs).ok_or(InferenceError::NonFinite { index })?;

    let mut emotions = [0.0f32; NUM_LABELS];
    for (slot, p) in emotions.iter_mut().zip(probs.iter()) {
        *slot = *p;
    }

    Ok(EmotionPrediction {
        text,
        emotions: EmotionScores(emotions),
        dominant_emotion: EMOTION_LABELS[dominant],
    })
}

#[derive(Clone)]
pub struct EmotionAnalyzer {
    classifier: Arc<dyn SequenceClassifier>,
}

impl EmotionAnalyzer {
    pub fn new(classifier: Arc<dyn SequenceClassifier>) -> Self {
        Self { classifier }
    }

    /// Classifies `texts` as one batch. The result has one prediction per
    /// input, in input order; any failure discards the whole batch.
    pub fn analyze(&self, texts: Vec<String>) -> Result<Vec<EmotionPrediction>, InferenceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let logits = self.classifier.logits(&texts)?;
        let expected = (texts.len(), NUM_LABELS);
        if logits.dim() != expected {
            return Err(InferenceError::OutputShape {
                expected,
                actual: logits.dim(),
            });
        }

        let probs = softmax_rows(&logits);
        texts
            .into_iter()
            .zip(probs.rows())
            .enumerate()
            .map(|(index, (text, row))| to_prediction(index, text, row))
            .collect()
    }
}
