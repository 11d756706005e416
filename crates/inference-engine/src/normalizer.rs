//! Raw prediction to public result mapping

use serde::{Deserialize, Serialize};
use std::fmt;

/// Class token that stands for the cat class.
///
/// Training labelled images with an `is_cat` predicate, so the cat class is
/// the token whose text is the positive boolean.
pub const CAT_SENTINEL: &str = "True";

/// Raw label value emitted by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassToken(String);

impl ClassToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact textual comparison against [`CAT_SENTINEL`]
    pub fn is_cat_sentinel(&self) -> bool {
        self.0 == CAT_SENTINEL
    }
}

impl From<bool> for ClassToken {
    fn from(flag: bool) -> Self {
        Self::new(if flag { "True" } else { "False" })
    }
}

impl fmt::Display for ClassToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direct classifier output for one image
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    /// Selected class token
    pub class_token: ClassToken,
    /// Probability per vocab entry, summing to 1.0
    pub probabilities: [f32; 2],
}

impl RawPrediction {
    /// Highest class probability
    pub fn max_probability(&self) -> f32 {
        self.probabilities[0].max(self.probabilities[1])
    }
}

/// Human-readable label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Cat,
    Dog,
}

impl Label {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Cat => "Cat",
            Label::Dog => "Dog",
        }
    }
}

/// Public classification result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub prediction: Label,
    /// Max class probability with exactly four decimals
    pub probability: String,
}

/// Map a raw prediction into the public result shape
pub fn normalize(raw: &RawPrediction) -> ClassificationResult {
    let prediction = if raw.class_token.is_cat_sentinel() {
        Label::Cat
    } else {
        Label::Dog
    };

    ClassificationResult {
        prediction,
        probability: format!("{:.4}", f64::from(raw.max_probability())),
    }
}
