use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::emotion::{EMOTION_LABELS, NUM_LABELS};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedbackRequest {
    pub texts: Vec<String>,
}

/// Probabilities for the six emotion labels, indexed in `EMOTION_LABELS` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionScores(pub [f32; NUM_LABELS]);

impl EmotionScores {
    pub fn get(&self, label: &str) -> Option<f32> {
        EMOTION_LABELS
            .iter()
            .position(|l| *l == label)
            .map(|idx| self.0[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        EMOTION_LABELS.iter().copied().zip(self.0.iter().copied())
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }
}

// Serialized as a JSON object with keys in label order.
impl Serialize for EmotionScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_LABELS))?;
        for (label, score) in self.iter() {
            map.serialize_entry(label, &score)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmotionPrediction {
    pub text: String,
    pub emotions: EmotionScores,
    pub dominant_emotion: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResponse {
    pub predictions: Vec<EmotionPrediction>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}
