//! Review inputs and classification records.
//!
//! This module defines the data structures flowing through the pipeline,
//! supporting flexible input formats and structured output.

use crate::error::{LensError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Explanation attached to reviews too short to classify.
pub const SHORT_TEXT_EXPLANATION: &str = "Review text is too short for meaningful analysis";

/// Raw-field marker for reviews that skipped the model.
pub const SHORT_TEXT_RAW: &str = "Skipped analysis due to short text length";

/// A review as submitted by the caller: a bare string or an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReviewInput {
    /// Plain review text.
    Text(String),
    /// Structured review; text is read from `snippet` or `text`, the id
    /// from `id`, and every field is echoed back on the output record.
    Object(Map<String, Value>),
}

impl ReviewInput {
    fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Object(map) => map
                .get("snippet")
                .or_else(|| map.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn explicit_id(&self) -> Option<u64> {
        match self {
            Self::Text(_) => None,
            Self::Object(map) => map.get("id").and_then(Value::as_u64),
        }
    }

    fn into_payload(self) -> Map<String, Value> {
        match self {
            Self::Text(_) => Map::new(),
            Self::Object(map) => map,
        }
    }
}

/// A single review item flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct ReviewItem {
    /// Caller-supplied id, or the positional index when absent.
    pub id: u64,
    /// The review text to classify.
    pub text: String,
    /// Caller-supplied payload fields, merged back into the output untouched.
    pub original: Map<String, Value>,
}

impl ReviewItem {
    /// Build pipeline items from caller inputs.
    ///
    /// Items without an explicit id get `offset + position`. Ids must be
    /// unique across the list; a caller id colliding with a positional
    /// default is rejected rather than silently overwritten.
    pub fn from_inputs(inputs: Vec<ReviewInput>, offset: usize) -> Result<Vec<ReviewItem>> {
        let items: Vec<ReviewItem> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| ReviewItem {
                id: input.explicit_id().unwrap_or((offset + index) as u64),
                text: input.text(),
                original: input.into_payload(),
            })
            .collect();

        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id) {
                return Err(LensError::Validation(format!(
                    "duplicate review id {}",
                    item.id
                )));
            }
        }

        Ok(items)
    }

    /// Text with surrounding whitespace removed.
    pub fn trimmed(&self) -> &str {
        self.text.trim()
    }
}

/// The discrete category assigned to a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Authentic review with positive sentiment.
    #[serde(rename = "Genuine-Positive")]
    GenuinePositive,
    /// Authentic review with negative sentiment.
    #[serde(rename = "Genuine-Negative")]
    GenuineNegative,
    /// Fabricated review intended to damage the subject.
    #[serde(rename = "Fake-Malicious")]
    FakeMalicious,
    /// Fabricated review intended to promote the subject.
    #[serde(rename = "Fake-Promotional")]
    FakePromotional,
    /// Review too short to judge.
    #[serde(rename = "Insufficient-Text")]
    InsufficientText,
    /// Model answered but no category could be extracted.
    #[serde(rename = "Unknown")]
    Unknown,
    /// Classification failed after retries.
    #[serde(rename = "Error")]
    Error,
}

impl Classification {
    /// The four labels the model is asked to choose from.
    pub const MODEL_LABELS: [Classification; 4] = [
        Classification::GenuinePositive,
        Classification::GenuineNegative,
        Classification::FakeMalicious,
        Classification::FakePromotional,
    ];

    /// Wire representation, matching the serde rename.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenuinePositive => "Genuine-Positive",
            Self::GenuineNegative => "Genuine-Negative",
            Self::FakeMalicious => "Fake-Malicious",
            Self::FakePromotional => "Fake-Promotional",
            Self::InsufficientText => "Insufficient-Text",
            Self::Unknown => "Unknown",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification result, order-aligned with its input item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// Caller-supplied payload fields, echoed untouched.
    #[serde(flatten)]
    pub original: Map<String, Value>,

    /// The item's id.
    pub id: u64,

    /// The review text that was classified.
    pub text: String,

    /// Assigned category. Never empty: every code path resolves to one
    /// of the seven values.
    pub classification: Classification,

    /// Certainty estimate, an integer in 0..=100 serialized as a string.
    #[serde(with = "confidence_string")]
    pub confidence: u8,

    /// Model's reasoning, cleaned up.
    pub explanation: String,

    /// The unparsed response fragment this record was extracted from.
    pub raw: String,
}

impl ClassificationRecord {
    /// Build a record for an item, stripping payload keys the record
    /// defines itself so the flattened output has a single value per key.
    pub fn new(
        item: &ReviewItem,
        classification: Classification,
        confidence: u8,
        explanation: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        let mut original = item.original.clone();
        for key in ["id", "text", "classification", "confidence", "explanation", "raw"] {
            original.remove(key);
        }
        Self {
            original,
            id: item.id,
            text: item.text.clone(),
            classification,
            confidence: confidence.min(100),
            explanation: explanation.into(),
            raw: raw.into(),
        }
    }

    /// Record for a review that skipped the model due to short text.
    pub fn insufficient_text(item: &ReviewItem) -> Self {
        Self::new(
            item,
            Classification::InsufficientText,
            0,
            SHORT_TEXT_EXPLANATION,
            SHORT_TEXT_RAW,
        )
    }

    /// Record for an item whose batch failed after containment.
    pub fn failed(item: &ReviewItem, explanation: impl Into<String>) -> Self {
        Self::new(item, Classification::Error, 0, explanation, "")
    }
}

/// Serialize confidence as a decimal string for wire compatibility.
mod confidence_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(confidence: &u8, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&confidence.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u8>().map_err(serde::de::Error::custom)
    }
}
