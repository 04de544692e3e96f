//! Transcript types

use serde::{Deserialize, Serialize};

/// Text recognized from one audio window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,

    /// Detected or requested language
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            confidence: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}
