//! Checks evaluated against built conversations.

use oidc_op_checks::conversation::MessageType;
use oidc_op_checks::engine::result::Report;
use oidc_op_checks::{run_flow, Conversation, Flow, RunConfig, Status};
use serde_json::json;

use crate::mocks::{id_token_claims, ConversationBuilder, FakeFetcher, ISSUER, JWKS_URI};

fn run(conv: Conversation, flow: &Flow) -> Report {
    run_flow(conv, flow, RunConfig::default()).unwrap().0
}

fn run_one(conv: Conversation, id: &str) -> oidc_op_checks::engine::result::CheckRecord {
    let report = run(conv, &Flow::from_ids(&[id]));
    report.checks.into_iter().next().unwrap()
}

#[test]
fn test_empty_conversation_passes_optional_checks() {
    let ids = [
        "check-response-type",
        "check-idtoken-nonce",
        "verify-nonce",
        "verify-state",
        "verify-aud",
        "verify-iss",
        "verify-id-token",
        "verify-userinfo",
        "check-http-response",
        "check_content_type_header",
        "verify-op-endpoints-use-https",
        "verify-base64url",
        "bare-keys",
    ];
    let report = run(ConversationBuilder::new().build(), &Flow::from_ids(&ids));

    assert_eq!(report.checks.len(), ids.len());
    for record in &report.checks {
        assert_eq!(record.status(), Status::Ok, "{} did not pass", record.id);
        assert!(record.outcome.detail.is_empty(), "{} has detail", record.id);
    }
}

#[test]
fn test_mandatory_data_missing_escalates() {
    let record = run_one(ConversationBuilder::new().build(), "check-keys");
    assert_eq!(record.status(), Status::Critical);
}

#[test]
fn test_response_type_not_supported() {
    let conv = ConversationBuilder::new()
        .provider(json!({"issuer": ISSUER, "response_types_supported": ["code"]}))
        .request_args(json!({"response_type": ["code", "token"]}))
        .build();
    let record = run_one(conv, "check-response-type");
    assert_eq!(record.status(), Status::Critical);
    assert_eq!(record.outcome.detail["requested"], json!("code token"));

    let conv = ConversationBuilder::new()
        .provider(json!({"response_types_supported": ["code", "code token"]}))
        .request_args(json!({"response_type": ["token", "code"]}))
        .build();
    assert!(run_one(conv, "check-response-type").outcome.is_pass());
}

#[test]
fn test_state_round_trip() {
    let conv = ConversationBuilder::new()
        .authorization_request(json!({"state": "abc123", "response_type": "code"}))
        .response(MessageType::AuthorizationResponse, json!({"state": "abc123", "code": "c"}))
        .build();
    assert_eq!(run_one(conv, "verify-state").status(), Status::Ok);

    let conv = ConversationBuilder::new()
        .authorization_request(json!({"state": "abc123"}))
        .response(MessageType::AuthorizationResponse, json!({"state": "xyz", "code": "c"}))
        .build();
    let record = run_one(conv, "verify-state");
    assert_eq!(record.status(), Status::Information);
    assert_eq!(
        record.outcome.message.as_deref(),
        Some("The state value returned not the same as sent")
    );
}

#[test]
fn test_id_token_nonce() {
    let matching = ConversationBuilder::new()
        .authorization_request(json!({"nonce": "n-0S6_WzA2Mj"}))
        .id_token(id_token_claims(json!({"nonce": "n-0S6_WzA2Mj"})))
        .build();
    assert!(run_one(matching, "check-idtoken-nonce").outcome.is_pass());

    let wrong = ConversationBuilder::new()
        .authorization_request(json!({"nonce": "n-0S6_WzA2Mj"}))
        .id_token(id_token_claims(json!({"nonce": "other"})))
        .build();
    assert_eq!(run_one(wrong, "check-idtoken-nonce").status(), Status::Error);

    let missing = ConversationBuilder::new()
        .authorization_request(json!({"nonce": "n-0S6_WzA2Mj"}))
        .id_token(id_token_claims(json!({})))
        .build();
    let record = run_one(missing, "check-idtoken-nonce");
    assert_eq!(record.status(), Status::Error);
    assert_eq!(
        record.outcome.message.as_deref(),
        Some("Expected same nonce back as sent")
    );
}

#[test]
fn test_base64url_names_offending_kid() {
    let fetcher = FakeFetcher::new().with_json(
        JWKS_URI,
        json!({"keys": [
            {"kty": "RSA", "kid": "good", "use": "sig", "e": "AQAB", "n": "0vx7agoebGcQSuuPiLJXZptN"},
            {"kty": "RSA", "kid": "k1", "use": "sig", "e": "AQAB", "n": "ab+/cd=="}
        ]}),
    );
    let conv = ConversationBuilder::new()
        .provider(json!({"issuer": ISSUER, "jwks_uri": JWKS_URI}))
        .fetcher(fetcher)
        .build();

    let record = run_one(conv, "verify-base64url");
    assert_eq!(record.status(), Status::Warning);
    let message = record.outcome.message.unwrap();
    assert!(message.contains("'k1'"), "{}", message);
    assert!(!message.contains("'good'"), "{}", message);
}

#[test]
fn test_base64url_unreachable_key_set() {
    let conv = ConversationBuilder::new()
        .provider(json!({"jwks_uri": JWKS_URI}))
        .fetcher(FakeFetcher::new().with_status(JWKS_URI, 404))
        .build();
    let flow = Flow::from_json(r#"[{"id": "verify-base64url", "params": {"err_status": "error"}}]"#).unwrap();
    let record = run(conv, &flow).checks.remove(0);
    assert_eq!(record.status(), Status::Error);
    assert!(record.outcome.message.unwrap().starts_with("Could not load JWK Set"));
}

fn four_tokens(second_auth_time: i64) -> Conversation {
    ConversationBuilder::new()
        .id_token(id_token_claims(json!({"nonce": "first", "auth_time": 1000})))
        .id_token(id_token_claims(json!({"nonce": "first", "auth_time": 1000})))
        .id_token(id_token_claims(json!({"nonce": "second", "auth_time": second_auth_time})))
        .id_token(id_token_claims(json!({"nonce": "second", "auth_time": second_auth_time})))
        .build()
}

#[test]
fn test_multiple_sign_on_compares_distinct_authentications() {
    let flow = Flow::from_json(r#"{"multiple-sign-on": {}}"#).unwrap();

    let record = run(four_tokens(2000), &flow).checks.remove(0);
    assert_eq!(record.status(), Status::Ok);

    let record = run(four_tokens(1000), &flow).checks.remove(0);
    assert_eq!(record.status(), Status::Error);
    assert_eq!(
        record.outcome.message.as_deref(),
        Some("Not two separate authentications!")
    );

    let flow = Flow::from_json(r#"{"multiple-sign-on": {"status": "WARNING"}}"#).unwrap();
    let record = run(four_tokens(1000), &flow).checks.remove(0);
    assert_eq!(record.status(), Status::Warning);
}

#[test]
fn test_checks_are_idempotent() {
    let mut conv = ConversationBuilder::new()
        .provider(json!({"issuer": ISSUER, "response_types_supported": ["code"]}))
        .request_args(json!({"response_type": ["code", "token"]}))
        .authorization_request(json!({"state": "abc123", "nonce": "n1"}))
        .response(MessageType::AuthorizationResponse, json!({"state": "xyz", "code": "c"}))
        .id_token(id_token_claims(json!({"nonce": "n2"})))
        .build();
    let flow = Flow::from_ids(&[
        "check-response-type",
        "verify-state",
        "check-idtoken-nonce",
        "verify-iss",
        "verify-aud",
    ]);

    let registry = oidc_op_checks::Registry::standard();
    let orchestrator =
        oidc_op_checks::CheckOrchestrator::new(oidc_op_checks::OrchestratorConfig::default(), registry);
    let first = orchestrator.run(&mut conv, &flow).unwrap();
    let second = orchestrator.run(&mut conv, &flow).unwrap();

    let outcomes = |report: &Report| report.checks.iter().map(|r| r.outcome.clone()).collect::<Vec<_>>();
    assert_eq!(outcomes(&first), outcomes(&second));
    assert_eq!(first.worst_status(), Status::Critical);
}

#[test]
fn test_replayed_conversation() {
    let json = json!({
        "entity": {
            "provider_info": {"issuer": ISSUER, "token_endpoint": "http://op.example.com/token"}
        },
        "events": [
            {"kind": "protocol_request", "timestamp": 1.0,
             "data": {"message": {"type": "authorization_request", "claims": {"state": "s1"}}}},
            {"kind": "protocol_response", "timestamp": 2.0,
             "data": {"message": {"type": "authorization_response", "claims": {"state": "s1", "code": "c"}}}},
            {"kind": "http_response", "timestamp": 3.0,
             "data": {"http": {"status": 200, "headers": {"Content-Type": "text/html"}, "body": "<html/>"}}}
        ]
    });
    let conv = Conversation::from_json(&json.to_string()).unwrap();
    let flow = Flow::from_ids(&[
        "verify-state",
        "verify-authn-response",
        "check_content_type_header",
        "verify-op-endpoints-use-https",
    ]);
    let report = run(conv, &flow);

    let status = |id: &str| report.get(id).unwrap().status();
    assert_eq!(status("verify-state"), Status::Ok);
    assert_eq!(status("verify-authn-response"), Status::Ok);
    assert_eq!(status("check_content_type_header"), Status::Error);
    assert_eq!(status("verify-op-endpoints-use-https"), Status::Error);
}
