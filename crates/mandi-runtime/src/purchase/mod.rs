//! Purchase executor
//!
//! Effects the order with durability, safety, and graceful degradation.
//! Phases per candidate: pre-validation, risk assessment, idempotency,
//! execute with bounded retry, then fallback to the next candidate. Every
//! phase transition lands in the audit log, and the terminal outcome is
//! fsync-durable before the result returns.

mod idempotency;
mod risk;

pub use idempotency::{idempotency_key, IdempotencyCache};
pub use risk::{risk_detail, risk_score, RiskFactors};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;

use mandi_core::stage::{StageContext, StageError};
use mandi_core::types::{
    Product, PurchaseResult, PurchaseStatus, RiskLevel, Session,
};
use mandi_connectors::{Connector, ConnectorError, OrderRequest, OtpChannel, OtpRequest, Quote};
use mandi_stores::{AuditRecordDraft, Durability, Event};

use crate::confirmation::RunPhase;
use crate::services::RuntimeServices;

const ACTOR: &str = "purchase_executor";
const PREVALIDATION_BUDGET: Duration = Duration::from_secs(5);
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_PURCHASE_BUDGET: Duration = Duration::from_secs(60);

enum CandidateOutcome {
    Done(PurchaseResult),
    NextCandidate,
}

/// The executor. One instance lives for the process; its idempotency cache
/// spans runs and sessions.
pub struct PurchaseExecutor {
    services: Arc<RuntimeServices>,
    cache: IdempotencyCache,
}

impl PurchaseExecutor {
    pub fn new(services: Arc<RuntimeServices>) -> Self {
        let window = services.tuning.idempotency_window;
        Self {
            services,
            cache: IdempotencyCache::new(window),
        }
    }

    /// Execute the purchase decided for this session.
    pub async fn execute(
        &self,
        session: &Session,
        ctx: &StageContext,
    ) -> Result<PurchaseResult, StageError> {
        let decision = session
            .decision()
            .ok_or_else(|| StageError::Internal("purchase before decision".to_string()))?;
        let intent = session
            .intent()
            .ok_or_else(|| StageError::Internal("purchase before intent".to_string()))?;
        let quantity = intent.quantity.max(1);

        // The user may have confirmed a different ranked option than the
        // policy pick.
        let selected = match session.confirmation().and_then(|c| c.selected_index) {
            Some(index) => {
                let ranking = session
                    .ranking()
                    .ok_or_else(|| StageError::Internal("purchase before comparison".to_string()))?;
                ranking
                    .ranked
                    .get(index)
                    .map(|r| r.product.clone())
                    .ok_or_else(|| {
                        StageError::Malformed(format!("selected index {} out of range", index))
                    })?
            }
            None => decision
                .selected
                .clone()
                .ok_or_else(|| StageError::Internal("purchase without selection".to_string()))?,
        };

        let fallbacks: Vec<Product> = decision
            .fallbacks
            .iter()
            .filter(|p| {
                p.connector_id != selected.connector_id || p.external_id != selected.external_id
            })
            .cloned()
            .collect();

        let started = Instant::now();
        let budget = ctx.deadline.unwrap_or(DEFAULT_PURCHASE_BUDGET);
        let mut audit_ids: Vec<String> = Vec::new();
        let mut attempts_total: u32 = 0;
        let mut last_failure = String::from("no candidates attempted");

        let candidates = std::iter::once(selected).chain(fallbacks);
        for (index, product) in candidates.enumerate() {
            let used_fallback = index > 0;
            if used_fallback {
                self.audit(
                    ctx,
                    &mut audit_ids,
                    "fallback_chosen",
                    json!({ "platform": product.connector_id, "product": product.external_id }),
                    Durability::Flush,
                )
                .await?;
            }

            let outcome = self
                .try_candidate(
                    ctx,
                    &product,
                    quantity,
                    used_fallback,
                    started,
                    budget,
                    &mut audit_ids,
                    &mut attempts_total,
                    &mut last_failure,
                )
                .await?;
            match outcome {
                CandidateOutcome::Done(result) => return Ok(result),
                CandidateOutcome::NextCandidate => continue,
            }
        }

        let result = PurchaseResult {
            status: PurchaseStatus::Failed,
            platform_used: None,
            order_id: None,
            payment_method: self.services.user.payment_method.clone(),
            risk_score: 0,
            risk_level: RiskLevel::Low,
            attempts: attempts_total,
            used_fallback: true,
            audit_ids: audit_ids.clone(),
            user_message: format!("every platform refused the order ({})", last_failure),
        };
        self.audit(
            ctx,
            &mut audit_ids,
            "terminal_result",
            json!({ "status": "failed", "attempts": attempts_total, "reason": last_failure }),
            Durability::Fsync,
        )
        .await?;
        let mut result = result;
        result.audit_ids = audit_ids;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_candidate(
        &self,
        ctx: &StageContext,
        product: &Product,
        quantity: u32,
        used_fallback: bool,
        started: Instant,
        budget: Duration,
        audit_ids: &mut Vec<String>,
        attempts_total: &mut u32,
        last_failure: &mut String,
    ) -> Result<CandidateOutcome, StageError> {
        let remaining = |started: Instant| budget.saturating_sub(started.elapsed());

        let Some(connector) = self.services.registry.get(&product.connector_id).await else {
            *last_failure = format!("connector '{}' not registered", product.connector_id);
            return Ok(CandidateOutcome::NextCandidate);
        };

        // Phase 1: pre-validation.
        self.audit(
            ctx,
            audit_ids,
            "validation_start",
            json!({ "platform": product.connector_id, "product": product.external_id }),
            Durability::Flush,
        )
        .await?;
        let quote = self
            .prevalidate(connector.as_ref(), product, remaining(started))
            .await;
        let (current_price, out_of_stock) = match &quote {
            Some(q) => (q.unit_price, q.stock == Some(0)),
            // Connector could not answer; proceed on the decided figures.
            None => (product.unit_price, false),
        };
        let price_delta_pct = if product.unit_price > 0.0 {
            (current_price - product.unit_price) / product.unit_price * 100.0
        } else {
            0.0
        };

        // Phase 2: risk assessment.
        let key = idempotency_key(
            &product.connector_id,
            &product.external_id,
            &self.services.user.user_id,
            &Utc::now().format("%Y-%m-%d").to_string(),
        );
        let factors = RiskFactors {
            price_delta_pct,
            out_of_stock,
            platform_health: self.services.registry.health(&product.connector_id).await,
            order_total: current_price * f64::from(quantity),
            duplicate_request: self.cache.seen_recently(&key),
        };
        let score = risk_score(&factors, self.services.tuning.budget_large);
        let level = RiskLevel::from_score(score, self.services.tuning.risk_critical_threshold);
        self.audit(
            ctx,
            audit_ids,
            "risk_computed",
            risk_detail(&factors, score),
            Durability::Flush,
        )
        .await?;

        if level == RiskLevel::Critical {
            self.audit(
                ctx,
                audit_ids,
                "risk_blocked",
                json!({ "score": score, "platform": product.connector_id }),
                Durability::Flush,
            )
            .await?;
            let mut result = PurchaseResult::blocked(
                score,
                level,
                format!(
                    "the order looked too risky (score {}); it needs manual review",
                    score
                ),
            );
            self.audit(
                ctx,
                audit_ids,
                "terminal_result",
                json!({ "status": "blocked", "score": score }),
                Durability::Fsync,
            )
            .await?;
            result.audit_ids = audit_ids.clone();
            return Ok(CandidateOutcome::Done(result));
        }

        if level == RiskLevel::High {
            let confirmed = self
                .reconfirm_high_risk(ctx, product, score, remaining(started))
                .await?;
            if !confirmed {
                self.audit(
                    ctx,
                    audit_ids,
                    "risk_blocked",
                    json!({ "score": score, "reason": "re-confirmation absent" }),
                    Durability::Flush,
                )
                .await?;
                let mut result = PurchaseResult::blocked(
                    score,
                    level,
                    "the order needed a fresh confirmation and none arrived".to_string(),
                );
                self.audit(
                    ctx,
                    audit_ids,
                    "terminal_result",
                    json!({ "status": "blocked", "score": score }),
                    Durability::Fsync,
                )
                .await?;
                result.audit_ids = audit_ids.clone();
                return Ok(CandidateOutcome::Done(result));
            }
        }

        // Phase 3: idempotency.
        if let Some(prior) = self.cache.fresh_success(&key) {
            self.audit(
                ctx,
                audit_ids,
                "duplicate_suppressed",
                json!({ "order_id": prior.order_id, "platform": prior.platform_used }),
                Durability::Flush,
            )
            .await?;
            return Ok(CandidateOutcome::Done(prior));
        }

        // Phase 4: execute with bounded retry.
        let max_attempts = if used_fallback {
            1
        } else {
            self.services.tuning.purchase_max_retries.max(1)
        };
        let mut attempt = 0u32;
        while attempt < max_attempts {
            attempt += 1;
            if ctx.cancel.is_cancelled() {
                self.audit(
                    ctx,
                    audit_ids,
                    "attempt_cancelled",
                    json!({ "platform": product.connector_id, "attempt": attempt }),
                    Durability::Flush,
                )
                .await?;
                return Err(StageError::Cancelled);
            }

            self.cache.record_attempt(&key);
            *attempts_total += 1;
            self.audit(
                ctx,
                audit_ids,
                "attempt_start",
                json!({ "platform": product.connector_id, "attempt": attempt }),
                Durability::Flush,
            )
            .await?;

            let order_result = self
                .place_order(ctx, connector.as_ref(), product, quantity, remaining(started))
                .await;
            match order_result {
                Ok(order_id) => {
                    self.services
                        .registry
                        .record_success(&product.connector_id)
                        .await;
                    self.audit(
                        ctx,
                        audit_ids,
                        "attempt_outcome",
                        json!({ "platform": product.connector_id, "attempt": attempt, "status": "success", "order_id": order_id }),
                        Durability::Flush,
                    )
                    .await?;
                    self.audit(
                        ctx,
                        audit_ids,
                        "terminal_result",
                        json!({
                            "status": "success",
                            "order_id": order_id,
                            "platform": product.connector_id,
                            "dry_run": self.services.tuning.dry_run,
                        }),
                        Durability::Fsync,
                    )
                    .await?;

                    let payment_method = if self.services.tuning.dry_run {
                        "simulated".to_string()
                    } else {
                        self.services.user.payment_method.clone()
                    };
                    let result = PurchaseResult {
                        status: PurchaseStatus::Success,
                        platform_used: Some(product.connector_id.clone()),
                        order_id: Some(order_id),
                        payment_method,
                        risk_score: score,
                        risk_level: level,
                        attempts: *attempts_total,
                        used_fallback,
                        audit_ids: audit_ids.clone(),
                        user_message: format!(
                            "{} arriving in about {} minutes",
                            product.title, product.delivery_eta_minutes
                        ),
                    };
                    self.cache.record_success(&key, result.clone());
                    return Ok(CandidateOutcome::Done(result));
                }
                Err(err) => {
                    self.services
                        .registry
                        .record_failure(&product.connector_id)
                        .await;
                    *last_failure = format!("{}: {}", product.connector_id, err);
                    self.audit(
                        ctx,
                        audit_ids,
                        "attempt_outcome",
                        json!({ "platform": product.connector_id, "attempt": attempt, "status": "error", "reason": err.reason() }),
                        Durability::Flush,
                    )
                    .await?;

                    if err.aborts_retries() {
                        tracing::warn!(
                            session_id = %ctx.session_id,
                            run_id = %ctx.run_id,
                            platform = %product.connector_id,
                            reason = err.reason(),
                            "aborting retries for candidate"
                        );
                        return Ok(CandidateOutcome::NextCandidate);
                    }
                    if !err.is_retryable() || attempt >= max_attempts {
                        return Ok(CandidateOutcome::NextCandidate);
                    }

                    // Exponential backoff, never extending the deadline.
                    let shift = (attempt - 1).min(16);
                    let delay = RETRY_BASE_DELAY
                        .saturating_mul(1 << shift)
                        .min(RETRY_MAX_DELAY)
                        .min(remaining(started));
                    if delay.is_zero() && remaining(started).is_zero() {
                        *last_failure =
                            format!("{}: purchase budget exhausted", product.connector_id);
                        return Ok(CandidateOutcome::NextCandidate);
                    }
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return Err(StageError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Ok(CandidateOutcome::NextCandidate)
    }

    async fn prevalidate(
        &self,
        connector: &dyn Connector,
        product: &Product,
        remaining: Duration,
    ) -> Option<Quote> {
        let deadline = PREVALIDATION_BUDGET.min(remaining);
        if deadline.is_zero() {
            return None;
        }
        match tokio::time::timeout(deadline, connector.quote(&product.external_id, deadline)).await
        {
            Ok(Ok(quote)) => Some(quote),
            Ok(Err(err)) => {
                tracing::warn!(
                    platform = %product.connector_id,
                    error = %err,
                    "pre-validation quote failed; using decided figures"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    platform = %product.connector_id,
                    "pre-validation quote timed out; using decided figures"
                );
                None
            }
        }
    }

    /// Re-enter the confirmation gate for a high-risk order.
    async fn reconfirm_high_risk(
        &self,
        ctx: &StageContext,
        product: &Product,
        score: u32,
        remaining: Duration,
    ) -> Result<bool, StageError> {
        let rx = self.services.confirmations.register(&ctx.run_id);
        self.services
            .sessions
            .set_awaiting_confirmation(&ctx.session_id, &ctx.run_id, true)
            .await;
        self.services
            .run_watch
            .set(&ctx.session_id, &ctx.run_id, RunPhase::AwaitingConfirmation);

        let detail = format!(
            "this order now scores {} on risk ({} on {}); confirm again to proceed",
            score, product.title, product.connector_id
        );
        if let Err(err) = self
            .services
            .bus
            .publish(
                &ctx.session_id,
                Event::confirmation_required(&ctx.session_id, &ctx.run_id, detail),
            )
            .await
        {
            tracing::warn!(error = %err, "failed to publish re-confirmation request");
        }

        // Bounded by both the confirmation window and the purchase budget.
        let window = self
            .services
            .tuning
            .confirmation_timeout
            .min(remaining.max(Duration::from_secs(1)));
        let confirmed = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                self.services.confirmations.forget(&ctx.run_id);
                return Err(StageError::Cancelled);
            }
            answered = tokio::time::timeout(window, rx) => {
                matches!(answered, Ok(Ok(outcome)) if outcome.accepted)
            }
        };

        self.services.confirmations.forget(&ctx.run_id);
        self.services
            .sessions
            .set_awaiting_confirmation(&ctx.session_id, &ctx.run_id, false)
            .await;
        self.services
            .run_watch
            .set(&ctx.session_id, &ctx.run_id, RunPhase::Running);
        Ok(confirmed)
    }

    async fn place_order(
        &self,
        ctx: &StageContext,
        connector: &dyn Connector,
        product: &Product,
        quantity: u32,
        remaining: Duration,
    ) -> Result<String, ConnectorError> {
        if self.services.tuning.dry_run {
            return Ok(format!(
                "DRY-{}-{}",
                product.connector_id.to_uppercase(),
                uuid::Uuid::new_v4().simple()
            ));
        }
        if remaining.is_zero() {
            return Err(ConnectorError::Unavailable(
                "purchase budget exhausted".to_string(),
            ));
        }

        let (otp_channel, otp_requests) = OtpChannel::new();
        let listener = tokio::spawn(Self::relay_otp_requests(
            self.services.clone(),
            ctx.session_id.clone(),
            ctx.run_id.clone(),
            otp_requests,
        ));

        let request = OrderRequest {
            product: product.clone(),
            quantity,
            user: self.services.user.clone(),
        };
        let result = match tokio::time::timeout(
            remaining,
            connector.order(&request, &otp_channel, remaining),
        )
        .await
        {
            Ok(Ok(receipt)) => Ok(receipt.order_id),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ConnectorError::Unavailable(format!(
                "order exceeded {:?}",
                remaining
            ))),
        };

        drop(otp_channel);
        listener.abort();
        result
    }

    /// Forward connector OTP demands to the user and relay the code back.
    async fn relay_otp_requests(
        services: Arc<RuntimeServices>,
        session_id: String,
        run_id: String,
        mut requests: tokio::sync::mpsc::Receiver<OtpRequest>,
    ) {
        while let Some(request) = requests.recv().await {
            let token = uuid::Uuid::new_v4().simple().to_string();
            let code_rx = services.otp.register(&token);
            if let Err(err) = services
                .bus
                .publish(
                    &session_id,
                    Event::otp_required(&session_id, &run_id, &token, request.detail.clone()),
                )
                .await
            {
                tracing::warn!(error = %err, "failed to publish otp request");
            }
            match code_rx.await {
                Ok(code) => {
                    let _ = request.reply.send(code);
                }
                Err(_) => {
                    services.otp.forget(&token);
                }
            }
        }
    }

    async fn audit(
        &self,
        ctx: &StageContext,
        audit_ids: &mut Vec<String>,
        action: &str,
        detail: serde_json::Value,
        durability: Durability,
    ) -> Result<(), StageError> {
        let draft = AuditRecordDraft::new(&ctx.session_id, &ctx.run_id, ACTOR, action, detail);
        let id = self
            .services
            .audit
            .append(draft, durability)
            .await
            .map_err(|err| StageError::Journal(err.to_string()))?;
        audit_ids.push(id);
        Ok(())
    }
}
