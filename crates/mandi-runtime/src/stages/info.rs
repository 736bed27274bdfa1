//! Knowledge lookup stage
//!
//! The knowledge base is an external collaborator; the built-in one is a
//! static table good enough for the common pantry questions and for turning
//! clarification intents into a question back to the user.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{InfoAnswer, IntentKind, Session, StageId};

/// Knowledge lookup seam.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn lookup(&self, query: &str, language_tag: &str) -> Result<InfoAnswer, StageError>;
}

/// Static keyword-keyed knowledge base.
pub struct StaticKnowledgeBase {
    entries: HashMap<&'static str, &'static str>,
}

impl StaticKnowledgeBase {
    pub fn new(entries: HashMap<&'static str, &'static str>) -> Self {
        Self { entries }
    }

    /// The pantry basics shipped with the runtime.
    pub fn with_builtin_entries() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "haldi",
            "Haldi is turmeric - a yellow spice used in most Indian cooking, \
             known for its earthy flavour and anti-inflammatory properties.",
        );
        entries.insert(
            "doodh",
            "Doodh means milk. Fresh milk is usually delivered within an hour \
             by quick-commerce platforms.",
        );
        entries.insert(
            "chane",
            "Chane are chickpeas. White chane (kabuli) are used for chhole; \
             black chane are smaller and nuttier.",
        );
        entries.insert(
            "atta",
            "Atta is whole-wheat flour, the staple for rotis and parathas.",
        );
        Self::new(entries)
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn lookup(&self, query: &str, _language_tag: &str) -> Result<InfoAnswer, StageError> {
        let lowered = query.to_lowercase();
        for (key, answer) in &self.entries {
            if lowered.contains(key) {
                return Ok(InfoAnswer::new(*answer).with_sources(1));
            }
        }
        Ok(InfoAnswer::new(format!(
            "I don't have details on \"{}\" yet. If you want to buy it, just say \
             \"order {}\".",
            query.trim_end_matches('?'),
            query.trim_end_matches('?'),
        )))
    }
}

pub struct QueryInfoStage {
    knowledge: Arc<dyn KnowledgeBase>,
}

impl QueryInfoStage {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Stage for QueryInfoStage {
    fn id(&self) -> StageId {
        StageId::QueryInfo
    }

    async fn run(
        &self,
        session: &Session,
        _ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let intent = session
            .intent()
            .ok_or_else(|| StageError::Internal("query before intent extraction".to_string()))?;

        // A clarify intent answers with the question the classifier raised.
        if intent.kind == IntentKind::Clarify {
            let question = intent
                .clarification_question
                .clone()
                .unwrap_or_else(|| "Could you rephrase that?".to_string());
            return Ok(StageOutput::Info(InfoAnswer::new(question)));
        }

        let query = intent
            .item
            .clone()
            .unwrap_or_else(|| session.request_text.clone());
        let answer = self.knowledge.lookup(&query, &intent.language_tag).await?;
        tracing::info!(
            session_id = %session.id,
            sources = answer.sources_used,
            "knowledge lookup answered"
        );
        Ok(StageOutput::Info(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandi_core::types::Intent;

    #[test]
    fn test_builtin_entry_hit() {
        tokio_test::block_on(async {
            let kb = StaticKnowledgeBase::with_builtin_entries();
            let answer = kb.lookup("what is haldi", "en").await.unwrap();
            assert!(answer.answer.contains("turmeric"));
            assert_eq!(answer.sources_used, 1);
        });
    }

    #[test]
    fn test_miss_suggests_ordering() {
        tokio_test::block_on(async {
            let kb = StaticKnowledgeBase::with_builtin_entries();
            let answer = kb.lookup("quinoa", "en").await.unwrap();
            assert!(answer.answer.contains("order quinoa"));
            assert_eq!(answer.sources_used, 0);
        });
    }

    #[test]
    fn test_clarify_intent_relays_question() {
        tokio_test::block_on(async {
            let mut session = Session::new("s1");
            let mut intent = Intent::info();
            intent.kind = IntentKind::Clarify;
            intent.clarification_question = Some("What should I get?".to_string());
            session.apply_output(StageId::IntentExtraction, StageOutput::Intent(intent));

            let stage =
                QueryInfoStage::new(Arc::new(StaticKnowledgeBase::with_builtin_entries()));
            let ctx = StageContext::new("s1", "r1");
            let StageOutput::Info(answer) = stage.run(&session, &ctx).await.unwrap() else {
                panic!("expected info output");
            };
            assert_eq!(answer.answer, "What should I get?");
        });
    }
}
