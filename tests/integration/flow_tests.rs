//! Full run integration tests.
//!
//! Flow resolution, halting behavior and custom registries.

use oidc_op_checks::checks::CheckResult;
use oidc_op_checks::engine::registry::{CheckDef, Constructor};
use oidc_op_checks::{
    run_flow, CheckCategory, CheckOrchestrator, Conversation, Error, Flow, OrchestratorConfig, Outcome, Registry,
    RunConfig, Status,
};
use serde_json::json;

use crate::mocks::{ConversationBuilder, ISSUER};

fn warn_check(_conv: &mut Conversation) -> CheckResult {
    Ok(Outcome::raised(Status::Warning, "local warning"))
}

fn panicking_check(_conv: &mut Conversation) -> CheckResult {
    panic!("boom")
}

fn def(id: &'static str, run: fn(&mut Conversation) -> CheckResult) -> CheckDef {
    CheckDef {
        id,
        name: id,
        category: CheckCategory::Generic,
        severity: Status::Warning,
        description: "test check",
        constructor: Constructor::Plain(run),
    }
}

#[test]
fn test_unknown_check_is_a_configuration_error() {
    let flow = Flow::from_ids(&["verify-state", "no-such-check"]);
    match run_flow(Conversation::new(), &flow, RunConfig::default()) {
        Err(Error::UnknownCheck { id }) => assert_eq!(id, "no-such-check"),
        other => panic!("expected unknown check, got {:?}", other.map(|(r, _)| r)),
    }
}

#[test]
fn test_invalid_params_fail_before_any_check_runs() {
    let mut conv = ConversationBuilder::new().build();
    let flow = Flow::from_json(r#"[{"id": "bare-keys"}, {"id": "verify-https-usage", "params": {"endpoint": []}}]"#)
        .unwrap();
    let orchestrator = CheckOrchestrator::new(OrchestratorConfig::default(), Registry::standard());
    let result = orchestrator.run(&mut conv, &flow);
    assert!(matches!(result, Err(Error::InvalidParams { ref id, .. }) if id == "verify-https-usage"));
    assert!(conv.events.is_empty());
}

#[test]
fn test_params_on_plain_check_rejected() {
    let flow = Flow::from_json(r#"{"verify-state": {"strict": true}}"#).unwrap();
    let result = run_flow(Conversation::new(), &flow, RunConfig::default());
    assert!(matches!(result, Err(Error::InvalidParams { .. })));
}

#[test]
fn test_malformed_flow_file() {
    assert!(matches!(Flow::from_json("[1, 2]"), Err(Error::Parse { .. })));
    assert!(matches!(Flow::from_json(r#"{"verify-state": 3}"#), Err(Error::Parse { .. })));
    assert!(Flow::from_json("not json").is_err());
}

#[test]
fn test_interaction_ends_the_run() {
    let conv = ConversationBuilder::new().build();
    let flow = Flow::from_ids(&["verify-state", "interaction-check", "check-keys"]);
    let (report, _) = run_flow(conv, &flow, RunConfig::default()).unwrap();

    assert_eq!(report.checks.len(), 2);
    assert_eq!(report.halted_at.as_deref(), Some("interaction-check"));
    assert_eq!(report.worst_status(), Status::Interaction);
}

#[test]
fn test_fail_fast_stops_at_first_error() {
    let conv = ConversationBuilder::new()
        .provider(json!({"issuer": ISSUER, "token_endpoint": "http://op.example.com/token"}))
        .build();
    let flow = Flow::from_ids(&["verify-op-endpoints-use-https", "check-keys", "verify-state"]);
    let config = RunConfig {
        fail_fast: true,
        ..RunConfig::default()
    };
    let (report, _) = run_flow(conv, &flow, config).unwrap();
    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.halted_at.as_deref(), Some("verify-op-endpoints-use-https"));
}

#[test]
fn test_skip_checks() {
    let config = RunConfig {
        skip_checks: vec!["check-keys".to_string()],
        ..RunConfig::default()
    };
    let flow = Flow::from_ids(&["check-keys", "verify-state"]);
    let (report, _) = run_flow(Conversation::new(), &flow, config).unwrap();
    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].id, "verify-state");
}

#[test]
fn test_stored_events_are_handed_back() {
    use crate::mocks::{FakeFetcher, JWKS_URI};
    use oidc_op_checks::conversation::EventKind;

    let conv = ConversationBuilder::new()
        .provider(json!({"jwks_uri": JWKS_URI}))
        .fetcher(FakeFetcher::new().with_json(JWKS_URI, json!({"keys": []})))
        .build();
    let (_, conv) = run_flow(conv, &Flow::from_ids(&["bare-keys"]), RunConfig::default()).unwrap();
    let stored = conv.events.get(EventKind::Jwks);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sender.as_deref(), Some("bare-keys"));
}

#[test]
fn test_local_registry_shadows_parent() {
    let registry = Registry::new("local", vec![def("check-http-response", warn_check)]).with_parent(Registry::generic());
    assert!(registry.contains("verify-response"));

    let mut conv = ConversationBuilder::new().http_response(500, "text/plain", "down").build();
    let report = CheckOrchestrator::new(OrchestratorConfig::default(), &registry)
        .run(&mut conv, &Flow::from_ids(&["check-http-response"]))
        .unwrap();
    assert_eq!(report.checks[0].outcome.message.as_deref(), Some("local warning"));
}

#[test]
fn test_panicking_check_is_contained() {
    let registry = Registry::new("local", vec![def("explodes", panicking_check), def("after", warn_check)]);
    let mut conv = Conversation::new();
    let report = CheckOrchestrator::new(OrchestratorConfig::default(), &registry)
        .run(&mut conv, &Flow::from_ids(&["explodes", "after"]))
        .unwrap();

    assert_eq!(report.checks.len(), 2);
    assert_eq!(report.checks[0].status(), Status::Critical);
    assert!(report.checks[0]
        .outcome
        .message
        .as_deref()
        .unwrap()
        .contains("boom"));
    assert_eq!(report.checks[1].status(), Status::Warning);
}
