//! Output formatter tests over reports from real runs.

use oidc_op_checks::cli::args::OutputFormat;
use oidc_op_checks::cli::exit_code;
use oidc_op_checks::cli::output::{format_check, get_formatter, JunitFormatter, OutputFormatter};
use oidc_op_checks::conversation::MessageType;
use oidc_op_checks::{run_flow, Flow, Registry, Report, RunConfig};
use serde_json::{json, Value};

use crate::mocks::{ConversationBuilder, ISSUER};

fn mixed_report() -> Report {
    let conv = ConversationBuilder::new()
        .provider(json!({"issuer": ISSUER, "userinfo_endpoint": "http://op.example.com/userinfo"}))
        .authorization_request(json!({"state": "abc123"}))
        .response(MessageType::AuthorizationResponse, json!({"state": "xyz", "code": "c"}))
        .build();
    let flow = Flow::from_ids(&["verify-state", "verify-op-endpoints-use-https", "verify-authn-response"]);
    run_flow(conv, &flow, RunConfig::default()).unwrap().0
}

#[test]
fn test_text_output_for_run() {
    let output = get_formatter(OutputFormat::Text, true, false, false).format(&mixed_report());
    assert!(output.contains("oidc-op-check conformance report"));
    assert!(output.contains("[INFO] verify-state"));
    assert!(output.contains("[FAIL] verify-op-endpoints-use-https"));
    assert!(output.contains("[ OK ] verify-authn-response"));
    assert!(output.contains("SUMMARY: 2 passed, 0 warnings, 1 failed (3 total)"));
}

#[test]
fn test_colored_output() {
    let output = get_formatter(OutputFormat::Text, false, false, false).format(&mixed_report());
    assert!(output.contains("\x1b[31m[FAIL]\x1b[0m"));
}

#[test]
fn test_json_output_round_trips_records() {
    let report = mixed_report();
    let output = get_formatter(OutputFormat::Json, true, false, false).format(&report);
    let value: Value = serde_json::from_str(&output).unwrap();

    assert_eq!(value["summary"]["total"], 3);
    assert_eq!(value["summary"]["error"], 1);
    assert_eq!(value["checks"][0]["id"], "verify-state");
    assert_eq!(value["checks"][0]["status"], "information");
    assert_eq!(value["checks"][1]["category"], "transport");

    let checks: Vec<oidc_op_checks::engine::result::CheckRecord> =
        serde_json::from_value(value["checks"].clone()).unwrap();
    assert_eq!(checks, report.checks);
}

#[test]
fn test_junit_output_counts_failures() {
    let output = JunitFormatter::new().format(&mixed_report());
    assert!(output.contains("<testsuites tests=\"3\" failures=\"1\""));
    assert!(output.contains("classname=\"oidc-op-check.transport\""));
    assert!(output.contains("type=\"ERROR\""));
}

#[test]
fn test_exit_code_for_run() {
    assert_eq!(exit_code(&mixed_report()), 1);

    let conv = ConversationBuilder::new().build();
    let (report, _) = run_flow(conv, &Flow::from_ids(&["verify-state"]), RunConfig::default()).unwrap();
    assert_eq!(exit_code(&report), 0);
}

#[test]
fn test_describe_output() {
    let def = Registry::standard().resolve("verify-base64url").unwrap();
    let text = format_check(def);
    assert!(text.starts_with("verify-base64url\n"));
    assert!(text.contains("Severity:    WARNING"));
    assert!(text.contains("Parameters:  yes"));
}
