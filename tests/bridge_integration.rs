//! Integration tests for the bridge facade.

use chrono::{DateTime, Duration, TimeZone, Utc};
use convergent::{
    AgentId, BridgeBuilder, ConvergentError, EngineConfig, Evidence, EvidenceKind, InMemoryBridge,
    IntentBuilder, IntentCategory, InterfaceKind, InterfaceSpec, MarkerType, QuorumLevel, Signal,
    SignalBus,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn bridge() -> InMemoryBridge {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    BridgeBuilder::new(EngineConfig::default())
        .build_in_memory()
        .unwrap()
}

#[test]
fn test_enrichment_composes_traces_constraints_and_intents() {
    let bridge = bridge();
    let me = AgentId::new("me");
    let files = vec!["src/auth.rs".to_string()];

    // Another agent left a pattern and recently touched the same file.
    bridge
        .stigmergy()
        .deposit(
            AgentId::new("other"),
            MarkerType::PatternFound,
            "src/auth.rs",
            "use the TokenBuilder for all token construction",
            0.9,
            t0(),
        )
        .unwrap();
    bridge
        .record_task_outcome(&AgentId::new("other"), "backend", true, &files, t0())
        .unwrap();

    // And published an intent claiming the same file.
    let intent = IntentBuilder::new("i-auth", "other", "Refactor auth session flow", IntentCategory::Decision, t0())
        .file("src/auth.rs")
        .evidence(Evidence::new(EvidenceKind::Committed, 0.0, t0(), "ci"))
        .build();
    bridge.publish_intent(&intent).unwrap();

    let prompt = bridge
        .enrich_prompt(&me, "Add token refresh", &files, t0() + Duration::hours(1))
        .unwrap();

    assert!(prompt.contains("TokenBuilder"), "alignment pattern missing:\n{prompt}");
    assert!(prompt.contains("Write contention"), "separation missing:\n{prompt}");
    assert!(prompt.contains("i-auth"), "related intent missing:\n{prompt}");
}

#[test]
fn test_enrichment_empty_graph_is_empty() {
    let bridge = bridge();
    let prompt = bridge
        .enrich_prompt(&AgentId::new("me"), "anything", &["src/new.rs".to_string()], t0())
        .unwrap();
    assert!(prompt.is_empty());
}

#[test]
fn test_voting_disabled_degrades_gracefully() {
    let bridge = BridgeBuilder::new(EngineConfig::default())
        .without_voting()
        .build_in_memory()
        .unwrap();

    // Consensus calls fail cleanly...
    let err = bridge.request_consensus(
        "t",
        "q",
        serde_json::json!({}),
        Some(QuorumLevel::Any),
        None,
        vec![],
        t0(),
    );
    assert!(err.is_err());

    // ...while enrichment still works.
    bridge
        .stigmergy()
        .deposit(AgentId::new("a"), MarkerType::KnownIssue, "src/x.rs", "careful", 0.5, t0())
        .unwrap();
    let prompt = bridge
        .enrich_prompt(&AgentId::new("me"), "task", &["src/x.rs".to_string()], t0())
        .unwrap();
    assert!(prompt.contains("careful"));
}

#[test]
fn test_record_task_outcome_updates_phi_and_markers() {
    let bridge = bridge();
    let agent = AgentId::new("worker");
    let files = vec!["src/a.rs".to_string(), "src/b.rs".to_string()];

    let before = bridge.phi().phi_at(&agent, "backend", t0()).unwrap();
    bridge
        .record_task_outcome(&agent, "backend", true, &files, t0())
        .unwrap();
    let after = bridge.phi().phi_at(&agent, "backend", t0()).unwrap();
    assert!(after > before);

    let markers = bridge.stigmergy().markers_for(&files, t0()).unwrap();
    assert_eq!(markers.len(), 2);
    assert!(markers.iter().all(|m| m.marker_type == MarkerType::FileModified));
}

#[test]
fn test_event_timeline_for_one_intent() {
    let bridge = bridge();
    let intent = IntentBuilder::new("i-x", "a", "claim x", IntentCategory::Decision, t0())
        .build();
    bridge.publish_intent(&intent).unwrap();
    bridge.publish_intent(&intent).unwrap(); // idempotent: no second event

    let timeline = bridge.timeline("i-x").unwrap();
    assert_eq!(timeline.events.len(), 1);
    assert_eq!(timeline.events[0].event_type, "intent_published");

    // The cursor drains the same log in batches.
    let mut cursor = bridge.events(1);
    assert_eq!(cursor.next_batch().unwrap().len(), 1);
    assert!(cursor.next_batch().unwrap().is_empty());
}

#[test]
fn test_health_report_degrades_with_cycles() {
    let bridge = bridge();
    let healthy = bridge.health_report(t0()).unwrap();
    assert_eq!(healthy.grade, 'A');

    let a = IntentBuilder::new("i-a", "x", "a", IntentCategory::Dependency, t0())
        .provides("alpha")
        .requires("beta")
        .evidence(Evidence::new(EvidenceKind::Committed, 0.0, t0(), "t"))
        .build();
    let b = IntentBuilder::new("i-b", "y", "b", IntentCategory::Dependency, t0())
        .provides("beta")
        .requires("alpha")
        .evidence(Evidence::new(EvidenceKind::Committed, 0.0, t0(), "t"))
        .build();
    bridge.publish_intent(&a).unwrap();
    bridge.publish_intent(&b).unwrap();

    let report = bridge.health_report(t0()).unwrap();
    assert!(report.grade > 'A', "grade should degrade: {report:?}");
    assert!(report.issues.iter().any(|i| i.subsystem == "graph"));
}

#[test]
fn test_signal_router_through_bridge() {
    let bridge = bridge();
    let bus = bridge.signals().bus();
    bus.publish(&Signal::broadcast(
        "task_done",
        AgentId::new("a"),
        serde_json::json!({"task": "t-1"}),
        t0(),
    ))
    .unwrap();

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    bridge.signals().subscribe(Some("task_done"), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let delivered = bridge.signals().pump(&AgentId::new("b")).unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_blocked_merge_raises_budget_exceeded_and_records_event() {
    let mut config = EngineConfig::default();
    // Too small to afford a single escalation.
    config.budget = 0.05;
    let bridge = BridgeBuilder::new(config).build_in_memory().unwrap();

    // Two evenly-matched claims on the same interface from distinct
    // agents: ambiguous, and worth escalating on expected value.
    let claim = |id: &str, agent: &str| {
        IntentBuilder::new(id, agent, "claim the User model", IntentCategory::Interface, t0())
            .interface(InterfaceSpec::new(
                "User",
                InterfaceKind::Class,
                vec!["auth".to_string()],
            ))
            .evidence(Evidence::new(EvidenceKind::Committed, 0.0, t0(), "ci"))
            .build()
    };
    bridge.publish_intent(&claim("i-a", "agent-a")).unwrap();
    bridge.publish_intent(&claim("i-b", "agent-b")).unwrap();

    let base = bridge
        .versioned()
        .seal(vec![], vec!["i-a".into()], t0())
        .unwrap();
    let incoming = bridge
        .versioned()
        .seal(vec![], vec!["i-b".into()], t0())
        .unwrap();

    let err = bridge
        .submit_merge(&base.snapshot_id, &incoming.snapshot_id, t0())
        .unwrap_err();
    match err {
        ConvergentError::BudgetExceeded { spent, budget } => {
            assert_eq!(spent, 0.0);
            assert_eq!(budget, 0.05);
        }
        other => panic!("expected BudgetExceeded, got {other}"),
    }

    // The exhaustion is visible on the merge timeline, not just in a
    // report the caller has to inspect by hand.
    let timeline = bridge
        .timeline(&format!("merge:{}", incoming.snapshot_id))
        .unwrap();
    let kinds: Vec<&str> = timeline.events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(kinds.contains(&"governor_verdict"), "events: {kinds:?}");
    assert!(kinds.contains(&"merge_blocked"), "events: {kinds:?}");
}

#[test]
fn test_execution_order_exposed_for_inspection() {
    let bridge = bridge();
    let provider = IntentBuilder::new("i-p", "x", "provider", IntentCategory::Dependency, t0())
        .provides("api")
        .build();
    let consumer = IntentBuilder::new("i-c", "y", "consumer", IntentCategory::Dependency, t0())
        .requires("api")
        .build();
    bridge.publish_intent(&consumer).unwrap();
    bridge.publish_intent(&provider).unwrap();

    let plan = bridge.graph().execution_order().unwrap();
    let order: Vec<&str> = plan.order.iter().map(|i| i.as_str()).collect();
    assert_eq!(order, vec!["i-p", "i-c"]);
    assert!(plan.blocked.is_empty());
}

#[cfg(feature = "sqlite")]
mod persistent {
    use super::*;

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig::persistent(dir.join("intents.db"))
    }

    #[test]
    fn test_state_survives_bridge_restart() {
        let dir = tempfile::tempdir().unwrap();

        let intent = IntentBuilder::new("i-p", "agent-a", "persist me", IntentCategory::Interface, t0())
            .interface(InterfaceSpec::new("Durable", InterfaceKind::Class, vec![]))
            .evidence(Evidence::new(EvidenceKind::Committed, 0.0, t0(), "ci"))
            .build();

        {
            let bridge = BridgeBuilder::new(config(dir.path()))
                .build_persistent()
                .unwrap();
            bridge.publish_intent(&intent).unwrap();
            bridge
                .record_task_outcome(&AgentId::new("agent-a"), "backend", true, &["src/d.rs".to_string()], t0())
                .unwrap();
        }

        let bridge = BridgeBuilder::new(config(dir.path()))
            .build_persistent()
            .unwrap();

        // Intent, phi history, and markers all survived.
        let stored = bridge.graph().get(&intent.intent_id).unwrap().unwrap();
        assert_eq!(stored.description, "persist me");
        let phi = bridge.phi().phi_at(&AgentId::new("agent-a"), "backend", t0()).unwrap();
        assert!(phi > 0.5);
        let markers = bridge
            .stigmergy()
            .markers_for(&["src/d.rs".to_string()], t0())
            .unwrap();
        assert_eq!(markers.len(), 1);

        // Re-publish after restart is still idempotent.
        bridge.publish_intent(&intent).unwrap();
        assert_eq!(bridge.graph().all_ordered().unwrap().len(), 1);
    }

    #[test]
    fn test_sibling_store_files_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let _bridge = BridgeBuilder::new(config.clone()).build_persistent().unwrap();

        assert!(config.db_path.as_ref().unwrap().exists());
        assert!(config.coordination_db_path().unwrap().exists());
        assert!(config.stigmergy_db_path().unwrap().exists());
        assert!(config.signal_db_path().unwrap().exists());
    }
}
