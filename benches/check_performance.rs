//! Performance benchmarks for oidc-op-checks.
//!
//! A full replay has to stay cheap enough to run after every test flow.

use std::time::{Duration, Instant};

use oidc_op_checks::cli::output::{JsonFormatter, JunitFormatter, OutputFormatter, TerminalFormatter};
use oidc_op_checks::conversation::{EventData, EventKind, Message, MessageType};
use oidc_op_checks::engine::result::{CheckRecord, Report};
use oidc_op_checks::{CheckCategory, CheckOrchestrator, Conversation, Flow, OrchestratorConfig, Outcome, Registry, Status};
use serde_json::{json, Map, Value};

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Conversation with a discovery document and `rounds` authentications
fn create_conversation(rounds: usize) -> Conversation {
    let mut conv = Conversation::new();
    conv.entity.provider_info = object(json!({
        "issuer": "https://op.example.com",
        "authorization_endpoint": "https://op.example.com/authz",
        "token_endpoint": "https://op.example.com/token",
        "response_types_supported": ["code", "id_token", "code id_token"],
        "scopes_supported": ["openid", "profile", "email"],
    }));
    conv.request_args = object(json!({"response_type": ["code"], "scope": ["openid", "email"]}));

    for i in 0..rounds {
        conv.events.push(
            EventKind::ProtocolRequest,
            EventData::Message(Message::with_claims(
                MessageType::AuthorizationRequest,
                object(json!({"state": format!("state-{}", i), "nonce": format!("nonce-{}", i)})),
            )),
        );
        conv.events.push(
            EventKind::ProtocolResponse,
            EventData::Message(Message::with_claims(
                MessageType::AuthorizationResponse,
                object(json!({"state": format!("state-{}", i), "code": "c"})),
            )),
        );
        conv.events.push(
            EventKind::ProtocolResponse,
            EventData::Message(Message::with_claims(
                MessageType::IdToken,
                object(json!({
                    "iss": "https://op.example.com",
                    "sub": "alice",
                    "aud": "client",
                    "nonce": format!("nonce-{}", i),
                    "auth_time": 1000 + i,
                })),
            )),
        );
    }
    conv
}

/// Every parameterless check of the standard catalog that only reads the log
fn create_flow() -> Flow {
    let ids: Vec<&str> = Registry::standard()
        .all()
        .into_iter()
        .filter(|d| !d.takes_params())
        .map(|d| d.id)
        .filter(|id| !matches!(*id, "interaction-check" | "verify-prompt-none-response" | "bare-keys"))
        .collect();
    Flow::from_ids(&ids)
}

/// Create a large report for output formatting benchmarks
fn create_large_report(num_checks: usize) -> Report {
    let mut report = Report::new();
    for i in 0..num_checks {
        let status = match i % 4 {
            0 => Status::Ok,
            1 => Status::Warning,
            2 => Status::Error,
            _ => Status::Information,
        };
        let outcome = if status == Status::Ok {
            Outcome::pass()
        } else {
            Outcome::raised(status, format!("Check {} reported <{}>", i, status)).with_detail("index", i)
        };
        report.checks.push(CheckRecord {
            id: format!("check-{}", i),
            name: format!("Check {}", i),
            category: CheckCategory::ALL[i % CheckCategory::ALL.len()],
            outcome,
            duration_ms: 1,
        });
    }
    report
}

fn report_timing(label: &str, per_iteration: Duration, target: Duration) {
    println!("{}: {:?} per iteration", label, per_iteration);
    println!("  Target: < {:?}", target);
    println!("  Result: {}", if per_iteration < target { "PASS" } else { "FAIL" });
    assert!(per_iteration < target, "{} too slow: {:?}", label, per_iteration);
}

/// Benchmark: resolving and instantiating the whole catalog
/// Target: < 5ms
fn bench_flow_preparation() {
    let registry = Registry::standard();
    let flow = create_flow();
    let orchestrator = CheckOrchestrator::new(OrchestratorConfig::default(), registry);
    let mut conv = Conversation::new();

    let iterations = 100;
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = orchestrator.run(&mut conv, &Flow::new(Vec::new()));
        for step in flow.steps() {
            let _ = registry.resolve(&step.id).and_then(|d| d.instantiate(&step.params));
        }
    }
    report_timing("Catalog preparation", start.elapsed() / iterations, Duration::from_millis(5));
}

/// Benchmark: replaying a conversation with many authentications
/// Target: < 50ms for the full catalog over 50 rounds
fn bench_full_replay() {
    let flow = create_flow();
    let orchestrator = CheckOrchestrator::new(OrchestratorConfig::default(), Registry::standard());
    let mut conv = create_conversation(50);

    let iterations = 20;
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = orchestrator.run(&mut conv, &flow);
    }
    println!("Flow of {} checks over {} events", flow.len(), conv.events.len());
    report_timing("Full replay", start.elapsed() / iterations, Duration::from_millis(50));
}

fn bench_formatter(label: &str, formatter: &dyn OutputFormatter) {
    let report = create_large_report(100);
    let iterations = 100;
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = formatter.format(&report);
    }
    report_timing(label, start.elapsed() / iterations, Duration::from_millis(100));
}

/// Benchmark: Output size for large reports
fn bench_output_sizes() {
    let report = create_large_report(100);

    println!("Output sizes for 100 checks:");
    println!("  Terminal: {} bytes", TerminalFormatter::new(false, false, false).format(&report).len());
    println!("  JSON:     {} bytes", JsonFormatter::new(true).format(&report).len());
    println!("  JUnit:    {} bytes", JunitFormatter::new().format(&report).len());
}

/// Run all benchmarks
fn main() {
    println!("=== oidc-op-checks Performance Benchmarks ===\n");

    println!("--- Check Execution Benchmarks ---");
    bench_flow_preparation();
    println!();

    bench_full_replay();
    println!();

    println!("--- Output Formatting Benchmarks ---");
    bench_formatter("Terminal formatting (100 checks)", &TerminalFormatter::new(true, true, false));
    println!();
    bench_formatter("JSON formatting (100 checks)", &JsonFormatter::new(true));
    println!();
    bench_formatter("JUnit formatting (100 checks)", &JunitFormatter::new());
    println!();

    println!("--- Output Size Benchmarks ---");
    bench_output_sizes();
    println!();

    println!("=== Benchmarks Complete ===");
}
