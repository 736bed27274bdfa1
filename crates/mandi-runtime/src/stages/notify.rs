//! Notification stage
//!
//! Composes the terminal plain-language message from whatever the run
//! produced. Technical detail stays in the event stream and the audit log;
//! the user gets one readable sentence or two.

use async_trait::async_trait;

use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{Notification, PurchaseStatus, Session, StageId};

pub struct NotificationStage;

#[async_trait]
impl Stage for NotificationStage {
    fn id(&self) -> StageId {
        StageId::Notification
    }

    async fn run(
        &self,
        session: &Session,
        _ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let notification = compose(session);
        Ok(StageOutput::Notice(notification))
    }
}

fn compose(session: &Session) -> Notification {
    if let Some(result) = session.purchase_result() {
        return match result.status {
            PurchaseStatus::Success => {
                let platform = result.platform_used.as_deref().unwrap_or("the platform");
                let order = result.order_id.as_deref().unwrap_or("-");
                Notification::new(
                    "ordered",
                    format!(
                        "Order placed on {} (order id {}, pay on delivery). {}",
                        platform, order, result.user_message
                    ),
                )
            }
            PurchaseStatus::Blocked => Notification::new(
                "blocked",
                format!("I did not place the order: {}", result.user_message),
            ),
            PurchaseStatus::Failed => Notification::new(
                "failed",
                format!("The order could not be placed: {}", result.user_message),
            ),
        };
    }

    if let Some(answer) = session.outputs.get(&StageId::QueryInfo) {
        if let StageOutput::Info(info) = answer {
            return Notification::new("info", info.answer.clone());
        }
    }

    if let Some(confirmation) = session.confirmation() {
        if !confirmation.accepted {
            return Notification::new(
                "order_cancelled",
                "Okay, I won't place that order.".to_string(),
            );
        }
    }

    if let Some(decision) = session.decision() {
        if !decision.made() {
            return Notification::new(
                "no_suitable_option",
                format!(
                    "I couldn't find a suitable option right now. {}",
                    decision.reasoning
                ),
            );
        }
        // Decision made but no purchase output: the confirmation window
        // lapsed before anyone answered.
        return Notification::new(
            "confirmation_timeout",
            "The confirmation window elapsed, so I did not place the order. \
             Ask again whenever you're ready."
                .to_string(),
        );
    }

    Notification::new(
        "done",
        "All done. Tell me what to order or ask me about an item.".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandi_core::types::{ConfirmationOutcome, Decision, InfoAnswer, PurchaseResult, RiskLevel};

    #[test]
    fn test_no_suitable_option_message() {
        let mut session = Session::new("s1");
        session.apply_output(
            StageId::Decision,
            StageOutput::Decision(Decision::declined("everything was out of stock")),
        );
        let notification = compose(&session);
        assert_eq!(notification.outcome, "no_suitable_option");
        assert!(notification.message.contains("out of stock"));
    }

    #[test]
    fn test_rejected_confirmation_message() {
        let mut session = Session::new("s1");
        session.apply_output(
            StageId::AwaitConfirmation,
            StageOutput::Confirmation(ConfirmationOutcome::rejected()),
        );
        let notification = compose(&session);
        assert_eq!(notification.outcome, "order_cancelled");
    }

    #[test]
    fn test_blocked_purchase_message() {
        let mut session = Session::new("s1");
        session.apply_output(
            StageId::Purchase,
            StageOutput::Purchase(PurchaseResult::blocked(
                90,
                RiskLevel::Critical,
                "risk too high",
            )),
        );
        let notification = compose(&session);
        assert_eq!(notification.outcome, "blocked");
        assert!(notification.message.contains("risk too high"));
    }

    #[test]
    fn test_info_answer_message() {
        let mut session = Session::new("s1");
        session.apply_output(
            StageId::QueryInfo,
            StageOutput::Info(InfoAnswer::new("Haldi is turmeric.")),
        );
        let notification = compose(&session);
        assert_eq!(notification.outcome, "info");
        assert_eq!(notification.message, "Haldi is turmeric.");
    }
}
