//! End-to-end pipeline scenarios over scripted connectors.

use std::sync::Arc;
use std::time::Duration;

use mandi_core::pipeline::{RunOutcome, StageTimeouts};
use mandi_core::types::{
    PurchaseStatus, RiskLevel, StageId, StageStatus, UserContext,
};
use mandi_connectors::{
    CatalogItem, ConnectorError, ConnectorRegistry, FanoutConfig, SearchFanout,
    StaticCatalogConnector,
};
use mandi_runtime::{
    ConfirmationRouter, Orchestrator, OtpRouter, RunWatch, RuntimeServices, RuntimeTuning,
};
use mandi_stores::{
    AuditLog, Event, InMemoryJournal, SessionEventBus, SessionStore, SessionStoreConfig,
    Subscription,
};

fn milk(price: f64, eta: u32) -> CatalogItem {
    CatalogItem {
        external_id: "milk-1l".to_string(),
        title: "Milk 1 litre".to_string(),
        unit_price: price,
        currency: "INR".to_string(),
        delivery_eta_minutes: eta,
        rating: Some(4.5),
        stock: Some(12),
        keywords: vec!["milk".to_string(), "doodh".to_string()],
    }
}

fn rice(price: f64, eta: u32) -> CatalogItem {
    CatalogItem {
        external_id: "rice-5kg".to_string(),
        title: "Rice 5 kg".to_string(),
        unit_price: price,
        currency: "INR".to_string(),
        delivery_eta_minutes: eta,
        rating: Some(4.4),
        stock: Some(6),
        keywords: vec!["rice".to_string(), "chawal".to_string()],
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    services: Arc<RuntimeServices>,
    fast: Arc<StaticCatalogConnector>,
    slow: Arc<StaticCatalogConnector>,
    _dir: tempfile::TempDir,
}

async fn harness_with(
    fast: StaticCatalogConnector,
    slow: StaticCatalogConnector,
    mutate: impl FnOnce(&mut RuntimeTuning),
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let audit = AuditLog::open(dir.path().join("audit.ndjson")).expect("audit log");

    let registry = Arc::new(ConnectorRegistry::new());
    let fast = Arc::new(fast);
    let slow = Arc::new(slow);
    registry.add(fast.clone()).await;
    registry.add(slow.clone()).await;

    let mut tuning = RuntimeTuning::default();
    mutate(&mut tuning);

    let services = Arc::new(RuntimeServices {
        sessions: Arc::new(SessionStore::new(SessionStoreConfig::default())),
        bus: Arc::new(SessionEventBus::default()),
        journal: Arc::new(InMemoryJournal::new()),
        audit,
        registry: registry.clone(),
        fanout: Arc::new(SearchFanout::new(registry, FanoutConfig::default())),
        confirmations: Arc::new(ConfirmationRouter::new()),
        otp: Arc::new(OtpRouter::new()),
        run_watch: Arc::new(RunWatch::new()),
        user: UserContext::new("test_user", "42 Test Lane"),
        tuning,
    });
    let orchestrator = Arc::new(Orchestrator::new(services.clone(), StageTimeouts::new()));

    Harness {
        orchestrator,
        services,
        fast,
        slow,
        _dir: dir,
    }
}

async fn default_harness() -> Harness {
    harness_with(
        StaticCatalogConnector::new("fast", vec![milk(60.0, 15)]),
        StaticCatalogConnector::new("slow", vec![milk(55.0, 90)]),
        |_| {},
    )
    .await
}

fn drain(sub: &mut Subscription) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    events
}

fn stage_statuses(events: &[Event], stage: StageId) -> Vec<StageStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StageUpdate(u) if u.stage_id == stage => Some(u.status),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn s1_happy_path_purchase() {
    let h = default_harness().await;
    let mut sub = h.services.bus.subscribe("s1").await;

    let report = h
        .orchestrator
        .handle_message("s1", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);
    assert!(report.outcome.is_none());

    let ranking = report.session.ranking().expect("ranking");
    assert_eq!(ranking.top().unwrap().product.connector_id, "fast");
    let decision = report.session.decision().expect("decision");
    assert_eq!(decision.selected.as_ref().unwrap().connector_id, "fast");
    assert_eq!(decision.fallbacks.len(), 1);
    assert_eq!(decision.fallbacks[0].connector_id, "slow");

    let confirmed = h
        .orchestrator
        .confirm("s1", true, Some(0))
        .await
        .expect("confirmation report");
    assert_eq!(confirmed.outcome, Some(RunOutcome::Completed));

    let result = confirmed.session.purchase_result().expect("purchase result");
    assert_eq!(result.status, PurchaseStatus::Success);
    assert_eq!(result.platform_used.as_deref(), Some("fast"));
    assert!(!result.used_fallback);
    assert_eq!(result.attempts, 1);
    assert!(result.order_id.is_some());
    assert!(!result.audit_ids.is_empty());

    // Every purchase-path stage completed exactly once; the info branch was
    // skipped exactly once.
    let events = drain(&mut sub);
    for stage in [
        StageId::IntentExtraction,
        StageId::TaskPlanning,
        StageId::Search,
        StageId::Comparison,
        StageId::Decision,
        StageId::AwaitConfirmation,
        StageId::Purchase,
        StageId::Notification,
    ] {
        let statuses = stage_statuses(&events, stage);
        assert_eq!(
            statuses,
            vec![StageStatus::Processing, StageStatus::Complete],
            "unexpected statuses for {}",
            stage
        );
    }
    assert_eq!(
        stage_statuses(&events, StageId::QueryInfo),
        vec![StageStatus::Skipped]
    );
}

#[tokio::test(start_paused = true)]
async fn s2_primary_fails_fallback_succeeds() {
    let h = default_harness().await;
    h.fast.script_orders(vec![
        Err(ConnectorError::Transient("gateway hiccup".into())),
        Err(ConnectorError::Transient("gateway hiccup".into())),
        Err(ConnectorError::Transient("gateway hiccup".into())),
        Err(ConnectorError::Unavailable("still down".into())),
    ]);

    let report = h
        .orchestrator
        .handle_message("s2", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);

    let confirmed = h
        .orchestrator
        .confirm("s2", true, Some(0))
        .await
        .expect("confirmation report");
    let result = confirmed.session.purchase_result().expect("purchase result");
    assert_eq!(result.status, PurchaseStatus::Success);
    assert_eq!(result.platform_used.as_deref(), Some("slow"));
    assert!(result.used_fallback);
    assert_eq!(result.attempts, 4);
    assert_eq!(h.fast.order_calls(), 3);
    assert_eq!(h.slow.order_calls(), 1);

    // Three primary attempts in the audit, then the fallback.
    let records = h.orchestrator.audit_records().await.expect("audit scan");
    let attempts: Vec<String> = records
        .iter()
        .filter(|r| r.action == "attempt_start")
        .map(|r| r.detail["platform"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(attempts, vec!["fast", "fast", "fast", "slow"]);
    assert!(records.iter().any(|r| r.action == "fallback_chosen"));
}

#[tokio::test]
async fn s3_critical_risk_blocks_purchase() {
    let h = harness_with(
        StaticCatalogConnector::new("fast", vec![milk(60.0, 15)]),
        StaticCatalogConnector::new("slow", vec![milk(55.0, 90)]),
        |tuning| {
            tuning.budget_large = 50.0;
        },
    )
    .await;

    // First order establishes the idempotency sighting.
    let report = h
        .orchestrator
        .handle_message("s3", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);
    let first = h
        .orchestrator
        .confirm("s3", true, Some(0))
        .await
        .expect("confirmation report");
    assert_eq!(
        first.session.purchase_result().unwrap().status,
        PurchaseStatus::Success
    );
    assert_eq!(h.fast.order_calls(), 1);

    let report = h
        .orchestrator
        .handle_message("s3", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);

    // The price spikes 120% between the decision and the purchase:
    // 40 (spike) + 20 (large order) + 30 (duplicate) = 90 -> critical.
    h.fast.set_price_factor(2.2);
    let blocked = h
        .orchestrator
        .confirm("s3", true, Some(0))
        .await
        .expect("confirmation report");

    let result = blocked.session.purchase_result().expect("purchase result");
    assert_eq!(result.status, PurchaseStatus::Blocked);
    assert_eq!(result.risk_level, RiskLevel::Critical);
    assert_eq!(result.risk_score, 90);
    // No further order call reached the connector.
    assert_eq!(h.fast.order_calls(), 1);

    let records = h.orchestrator.audit_records().await.expect("audit scan");
    assert!(records.iter().any(|r| r.action == "risk_blocked"));
}

#[tokio::test]
async fn s4_info_path_skips_commerce_stages() {
    let h = default_harness().await;
    let mut sub = h.services.bus.subscribe("s4").await;

    let report = h
        .orchestrator
        .handle_message("s4", "what is haldi?")
        .await
        .expect("run report");
    assert!(!report.awaiting_confirmation);
    assert_eq!(report.outcome, Some(RunOutcome::Completed));

    let intent = report.session.intent().expect("intent");
    assert_eq!(intent.kind, mandi_core::types::IntentKind::Info);

    let events = drain(&mut sub);
    for stage in [
        StageId::Search,
        StageId::Comparison,
        StageId::Decision,
        StageId::Purchase,
    ] {
        assert_eq!(
            stage_statuses(&events, stage),
            vec![StageStatus::Skipped],
            "expected exactly one skip for {}",
            stage
        );
    }
    assert_eq!(
        stage_statuses(&events, StageId::QueryInfo),
        vec![StageStatus::Processing, StageStatus::Complete]
    );
    assert_eq!(
        stage_statuses(&events, StageId::Notification),
        vec![StageStatus::Processing, StageStatus::Complete]
    );
}

#[tokio::test(start_paused = true)]
async fn s5_cancellation_mid_search() {
    let h = harness_with(
        StaticCatalogConnector::new("fast", vec![rice(380.0, 30)])
            .with_latency(Duration::from_secs(8)),
        StaticCatalogConnector::new("slow", vec![rice(360.0, 60)])
            .with_latency(Duration::from_secs(8)),
        |_| {},
    )
    .await;
    let mut sub = h.services.bus.subscribe("s5").await;

    let orchestrator = h.orchestrator.clone();
    let handle = tokio::spawn(async move {
        orchestrator.handle_message("s5", "rice 5kg").await
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.orchestrator.cancel("s5").await);

    let report = handle.await.expect("join").expect("run report");
    assert_eq!(report.outcome, Some(RunOutcome::Cancelled));

    let events = drain(&mut sub);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::RunCancelled { .. })));
    // Nothing completed after the cancellation and the decision stages never
    // started.
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::StageUpdate(u) if u.status == StageStatus::Complete
            && u.stage_id != StageId::IntentExtraction
            && u.stage_id != StageId::TaskPlanning
    )));
    for stage in [StageId::Comparison, StageId::Decision, StageId::Purchase] {
        assert!(stage_statuses(&events, stage).is_empty());
    }
}

#[tokio::test]
async fn s6_idempotent_replay_returns_first_order() {
    let h = default_harness().await;

    let report = h
        .orchestrator
        .handle_message("s6", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);
    let first = h
        .orchestrator
        .confirm("s6", true, Some(0))
        .await
        .expect("confirmation report");
    let first_result = first.session.purchase_result().expect("purchase result").clone();
    assert_eq!(first_result.status, PurchaseStatus::Success);
    let first_order = first_result.order_id.clone().expect("order id");

    // Same product, same session, same day, seconds later.
    let report = h
        .orchestrator
        .handle_message("s6", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);
    let second = h
        .orchestrator
        .confirm("s6", true, Some(0))
        .await
        .expect("confirmation report");
    let second_result = second.session.purchase_result().expect("purchase result");

    assert_eq!(second_result.order_id.as_deref(), Some(first_order.as_str()));
    assert_eq!(h.fast.order_calls(), 1);

    let records = h.orchestrator.audit_records().await.expect("audit scan");
    let attempt_starts = records
        .iter()
        .filter(|r| r.action == "attempt_start")
        .count();
    assert_eq!(attempt_starts, 1);
    assert!(records.iter().any(|r| r.action == "duplicate_suppressed"));
}

#[tokio::test]
async fn rejected_confirmation_cancels_order() {
    let h = default_harness().await;

    let report = h
        .orchestrator
        .handle_message("s7", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);

    let rejected = h
        .orchestrator
        .confirm("s7", false, None)
        .await
        .expect("confirmation report");
    assert_eq!(rejected.outcome, Some(RunOutcome::Completed));
    assert!(rejected.session.purchase_result().is_none());

    let notice = match rejected.session.outputs.get(&StageId::Notification) {
        Some(mandi_core::stage::StageOutput::Notice(n)) => n.clone(),
        other => panic!("expected notification output, got {:?}", other),
    };
    assert_eq!(notice.outcome, "order_cancelled");
    assert_eq!(h.fast.order_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn confirmation_timeout_fails_run_without_purchase() {
    let h = harness_with(
        StaticCatalogConnector::new("fast", vec![milk(60.0, 15)]),
        StaticCatalogConnector::new("slow", vec![milk(55.0, 90)]),
        |tuning| {
            tuning.confirmation_timeout = Duration::from_secs(2);
        },
    )
    .await;

    let orchestrator = h.orchestrator.clone();
    let handle = tokio::spawn(async move {
        orchestrator.handle_message("s8", "milk 1 litre").await
    });

    // First report parks on the confirmation gate.
    let report = handle.await.expect("join").expect("run report");
    assert!(report.awaiting_confirmation);

    // Nobody answers; the run fails with confirmation_timeout but the
    // notification still went out.
    let (_, mut phase_rx) = h
        .services
        .run_watch
        .subscribe("s8")
        .expect("phase watch");
    loop {
        if matches!(
            &*phase_rx.borrow_and_update(),
            mandi_runtime::RunPhase::Finished(_)
        ) {
            break;
        }
        phase_rx.changed().await.expect("phase change");
    }

    let session = h
        .orchestrator
        .session_snapshot("s8")
        .await
        .expect("session");
    assert!(session.purchase_result().is_none());
    let notice = match session.outputs.get(&StageId::Notification) {
        Some(mandi_core::stage::StageOutput::Notice(n)) => n.clone(),
        other => panic!("expected notification output, got {:?}", other),
    };
    assert_eq!(notice.outcome, "confirmation_timeout");
    assert_eq!(h.fast.order_calls(), 0);

    let last_run = h.services.sessions.last_run("s8").await.expect("last run");
    assert_eq!(
        last_run.stage_status(StageId::AwaitConfirmation),
        StageStatus::Error
    );
}

#[tokio::test]
async fn dry_run_simulates_the_order() {
    let h = harness_with(
        StaticCatalogConnector::new("fast", vec![milk(60.0, 15)]),
        StaticCatalogConnector::new("slow", vec![milk(55.0, 90)]),
        |tuning| {
            tuning.dry_run = true;
        },
    )
    .await;

    let report = h
        .orchestrator
        .handle_message("s10", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);
    let confirmed = h
        .orchestrator
        .confirm("s10", true, Some(0))
        .await
        .expect("confirmation report");

    let result = confirmed.session.purchase_result().expect("purchase result");
    assert_eq!(result.status, PurchaseStatus::Success);
    assert!(result.order_id.as_deref().unwrap().starts_with("DRY-"));
    assert_eq!(result.payment_method, "simulated");
    // The real connector was never asked to order.
    assert_eq!(h.fast.order_calls(), 0);

    let records = h.orchestrator.audit_records().await.expect("audit scan");
    let terminal = records
        .iter()
        .find(|r| r.action == "terminal_result")
        .expect("terminal record");
    assert_eq!(terminal.detail["dry_run"], true);
}

#[tokio::test]
async fn otp_demand_is_relayed_and_answered() {
    let h = harness_with(
        StaticCatalogConnector::new("fast", vec![milk(60.0, 15)]).with_otp_required(),
        StaticCatalogConnector::new("slow", vec![milk(55.0, 90)]),
        |_| {},
    )
    .await;
    let mut sub = h.services.bus.subscribe("s11").await;

    let report = h
        .orchestrator
        .handle_message("s11", "milk 1 litre")
        .await
        .expect("run report");
    assert!(report.awaiting_confirmation);

    let orchestrator = h.orchestrator.clone();
    let confirm = tokio::spawn(async move {
        orchestrator.confirm("s11", true, Some(0)).await
    });

    // The connector demands a code mid-order; relay one back.
    let token = loop {
        match sub.recv().await.expect("event stream open") {
            Event::OtpRequired { token, .. } => break token,
            _ => continue,
        }
    };
    assert!(h.orchestrator.deliver_otp(&token, "424242".to_string()));

    let confirmed = confirm.await.expect("join").expect("confirmation report");
    let result = confirmed.session.purchase_result().expect("purchase result");
    assert_eq!(result.status, PurchaseStatus::Success);
    assert_eq!(result.platform_used.as_deref(), Some("fast"));
}

#[tokio::test]
async fn urgent_auto_buy_gap_is_judged_after_disqualification() {
    // The raw front-runner is out of stock and disqualified; the two real
    // candidates are nearly tied, so the urgent run still stops at the
    // confirmation gate instead of auto-buying on the stale gap.
    let mut premium = milk(60.0, 15);
    premium.external_id = "milk-premium".to_string();
    premium.title = "Milk Premium 1 litre".to_string();
    premium.stock = Some(0);
    let mut standard = milk(62.0, 20);
    standard.external_id = "milk-standard".to_string();
    standard.rating = Some(5.0);

    let h = harness_with(
        StaticCatalogConnector::new("fast", vec![premium, standard]),
        StaticCatalogConnector::new("slow", vec![milk(58.0, 25)]),
        |_| {},
    )
    .await;

    let report = h
        .orchestrator
        .handle_message("s12", "doodh khatam ho gaya jaldi mangao")
        .await
        .expect("run report");

    // The out-of-stock item still tops the raw ranking.
    let ranking = report.session.ranking().expect("ranking");
    assert_eq!(ranking.top().unwrap().product.external_id, "milk-premium");

    let decision = report.session.decision().expect("decision");
    assert!(!decision.auto_buy);
    assert_eq!(decision.selected.as_ref().unwrap().connector_id, "slow");
    assert!(report.awaiting_confirmation);

    // Confirming the policy pick orders from the surviving winner.
    let confirmed = h
        .orchestrator
        .confirm("s12", true, None)
        .await
        .expect("confirmation report");
    let result = confirmed.session.purchase_result().expect("purchase result");
    assert_eq!(result.status, PurchaseStatus::Success);
    assert_eq!(result.platform_used.as_deref(), Some("slow"));
    assert_eq!(h.slow.order_calls(), 1);
    assert_eq!(h.fast.order_calls(), 0);
}

#[tokio::test]
async fn urgent_clear_winner_auto_buys_without_confirmation() {
    // The alternative is slow and badly rated, so the winner clears the
    // auto-buy gap.
    let mut mediocre = milk(58.0, 90);
    mediocre.rating = Some(2.0);
    let h = harness_with(
        StaticCatalogConnector::new("fast", vec![milk(60.0, 15)]),
        StaticCatalogConnector::new("slow", vec![mediocre]),
        |_| {},
    )
    .await;

    let report = h
        .orchestrator
        .handle_message("s9", "doodh khatam ho gaya jaldi mangao")
        .await
        .expect("run report");

    // No confirmation gate: the run goes straight through to purchase.
    assert!(!report.awaiting_confirmation);
    assert_eq!(report.outcome, Some(RunOutcome::Completed));
    let decision = report.session.decision().expect("decision");
    assert!(decision.auto_buy);
    let result = report.session.purchase_result().expect("purchase result");
    assert_eq!(result.status, PurchaseStatus::Success);
    assert_eq!(result.platform_used.as_deref(), Some("fast"));
}
