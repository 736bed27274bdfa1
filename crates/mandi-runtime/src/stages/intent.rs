//! Intent extraction stage
//!
//! The classifier seam turns a raw utterance into a structured intent. The
//! built-in implementation is a deterministic heuristic over cue words; it
//! understands indirect phrasing common in mixed Hindi/English speech
//! ("doodh khatam ho gaya" means buy milk, not a stock report).

use std::sync::Arc;

use async_trait::async_trait;

use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{Intent, IntentKind, Session, StageId, Urgency};

/// Classifier seam; treated as a pure function of the utterance.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str) -> Result<Intent, StageError>;
}

/// Cue words implying "buy this", across English, Hindi, and Hinglish.
const PURCHASE_CUES: [&str; 14] = [
    "buy", "order", "purchase", "get me", "need", "mangao", "mangwa", "chahiye", "le aao",
    "khatam", "nahi bachi", "nahi bacha", "kharido", "reorder",
];

const INFO_CUES: [&str; 8] = [
    "what", "what's", "how", "why", "kya hai", "kya hota", "kaise", "batao",
];

const URGENT_CUES: [&str; 6] = ["urgent", "urgently", "asap", "jaldi", "abhi", "turant"];

const RELAXED_CUES: [&str; 3] = ["no rush", "whenever", "koi jaldi nahi"];

/// Words stripped when recovering the item name from the utterance.
const FILLER_WORDS: [&str; 27] = [
    "buy", "order", "purchase", "get", "me", "some", "need", "i", "please", "a", "an", "the",
    "mangao", "chahiye", "karo", "kar", "do", "le", "aao", "ho", "gaye", "gaya", "khatam",
    "nahi", "bachi", "bacha", "reorder",
];

/// Deterministic keyword classifier.
pub struct HeuristicIntentClassifier;

impl HeuristicIntentClassifier {
    pub fn new() -> Self {
        Self
    }

    fn detect_language(utterance: &str) -> &'static str {
        if utterance
            .chars()
            .any(|c| ('\u{0900}'..='\u{097F}').contains(&c))
        {
            return "hi";
        }
        let lowered = utterance.to_lowercase();
        const HINGLISH_MARKERS: [&str; 8] = [
            "khatam", "mangao", "chahiye", "jaldi", "doodh", "nahi", "karo", "hai",
        ];
        if HINGLISH_MARKERS.iter().any(|m| lowered.contains(m)) {
            "hi-Latn"
        } else {
            "en"
        }
    }

    fn detect_urgency(lowered: &str) -> Urgency {
        if URGENT_CUES.iter().any(|cue| lowered.contains(cue)) {
            Urgency::High
        } else if RELAXED_CUES.iter().any(|cue| lowered.contains(cue)) {
            Urgency::Low
        } else {
            Urgency::Normal
        }
    }

    fn detect_quantity(lowered: &str) -> u32 {
        lowered
            .split_whitespace()
            .find_map(|word| word.trim_matches(|c: char| !c.is_ascii_digit()).parse().ok())
            .filter(|q| *q > 0)
            .unwrap_or(1)
    }

    fn extract_item(lowered: &str) -> Option<String> {
        let kept: Vec<&str> = lowered
            .split_whitespace()
            .filter(|word| {
                let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
                !bare.is_empty()
                    && bare.parse::<u32>().is_err()
                    && !FILLER_WORDS.contains(&bare)
                    && !URGENT_CUES.contains(&bare)
            })
            .collect();
        if kept.is_empty() {
            None
        } else {
            Some(kept.join(" "))
        }
    }
}

impl Default for HeuristicIntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentClassifier for HeuristicIntentClassifier {
    async fn classify(&self, utterance: &str) -> Result<Intent, StageError> {
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return Err(StageError::Internal("empty utterance".to_string()));
        }
        let lowered = trimmed.to_lowercase();
        let language = Self::detect_language(trimmed);
        let urgency = Self::detect_urgency(&lowered);
        let quantity = Self::detect_quantity(&lowered);

        let has_purchase_cue = PURCHASE_CUES.iter().any(|cue| lowered.contains(cue));
        let has_info_cue =
            lowered.contains('?') || INFO_CUES.iter().any(|cue| lowered.starts_with(cue));

        if has_info_cue && !has_purchase_cue {
            return Ok(Intent {
                kind: IntentKind::Info,
                item: Self::extract_item(&lowered),
                item_original: Some(trimmed.to_string()),
                quantity: 1,
                urgency,
                confidence: 0.85,
                language_tag: language.to_string(),
                clarification_question: None,
            });
        }

        let item = Self::extract_item(&lowered);
        if has_purchase_cue {
            if item.is_none() {
                return Ok(Intent {
                    kind: IntentKind::Clarify,
                    item: None,
                    item_original: Some(trimmed.to_string()),
                    quantity,
                    urgency,
                    confidence: 0.3,
                    language_tag: language.to_string(),
                    clarification_question: Some(
                        "I understood you want to order something - what should I get?"
                            .to_string(),
                    ),
                });
            }
            return Ok(Intent {
                kind: IntentKind::Purchase,
                item,
                item_original: Some(trimmed.to_string()),
                quantity,
                urgency,
                confidence: 0.9,
                language_tag: language.to_string(),
                clarification_question: None,
            });
        }

        // Short bare phrases ("milk 1 litre") read as purchase requests.
        if trimmed.split_whitespace().count() <= 4 && item.is_some() {
            return Ok(Intent {
                kind: IntentKind::Purchase,
                item,
                item_original: Some(trimmed.to_string()),
                quantity,
                urgency,
                confidence: 0.6,
                language_tag: language.to_string(),
                clarification_question: None,
            });
        }

        Ok(Intent {
            kind: IntentKind::Clarify,
            item,
            item_original: Some(trimmed.to_string()),
            quantity,
            urgency,
            confidence: 0.3,
            language_tag: language.to_string(),
            clarification_question: Some(
                "Could you say that again? Tell me what to order or what to look up.".to_string(),
            ),
        })
    }
}

/// The stage wrapper over the classifier seam.
pub struct IntentStage {
    classifier: Arc<dyn IntentClassifier>,
}

impl IntentStage {
    pub fn new(classifier: Arc<dyn IntentClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Stage for IntentStage {
    fn id(&self) -> StageId {
        StageId::IntentExtraction
    }

    async fn run(
        &self,
        session: &Session,
        _ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let intent = self.classifier.classify(&session.request_text).await?;
        tracing::info!(
            session_id = %session.id,
            kind = ?intent.kind,
            item = intent.item.as_deref().unwrap_or("-"),
            urgency = ?intent.urgency,
            language = %intent.language_tag,
            "intent extracted"
        );
        Ok(StageOutput::Intent(intent))
    }
}
