//! Intent type definitions
//!
//! Intent is the structured reading of one user utterance: what they want,
//! how much of it, and how badly. Utterances may be mixed-language and
//! voice-transcribed; the classifier records the language it detected.

use serde::{Deserialize, Serialize};

/// What the user is asking the system to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Buy something.
    Purchase,
    /// Answer a question, no transaction.
    Info,
    /// The utterance was too ambiguous; ask the user before proceeding.
    Clarify,
}

/// How quickly the user needs the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Normal,
    High,
}

impl Default for Urgency {
    fn default() -> Self {
        Urgency::Normal
    }
}

/// Structured intent extracted from one user utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    /// Item name normalized to English, if one was mentioned.
    #[serde(default)]
    pub item: Option<String>,
    /// Item exactly as the user phrased it.
    #[serde(default)]
    pub item_original: Option<String>,
    /// Desired quantity of the item.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub urgency: Urgency,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    /// BCP 47-ish tag of the detected input language (en, hi, hi-Latn).
    pub language_tag: String,
    /// Question to put to the user when `kind == Clarify`.
    #[serde(default)]
    pub clarification_question: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

impl Intent {
    /// Build a purchase intent for an item.
    pub fn purchase(item: impl Into<String>) -> Self {
        let item = item.into();
        Self {
            kind: IntentKind::Purchase,
            item_original: Some(item.clone()),
            item: Some(item),
            quantity: 1,
            urgency: Urgency::Normal,
            confidence: 1.0,
            language_tag: "en".to_string(),
            clarification_question: None,
        }
    }

    /// Build an informational intent.
    pub fn info() -> Self {
        Self {
            kind: IntentKind::Info,
            item: None,
            item_original: None,
            quantity: 1,
            urgency: Urgency::Normal,
            confidence: 1.0,
            language_tag: "en".to_string(),
            clarification_question: None,
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity.max(1);
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_language_tag(mut self, tag: impl Into<String>) -> Self {
        self.language_tag = tag.into();
        self
    }

    /// Whether this intent should route to the purchase path.
    pub fn wants_purchase(&self) -> bool {
        self.kind == IntentKind::Purchase
    }
}
