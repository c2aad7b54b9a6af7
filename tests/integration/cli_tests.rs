//! CLI integration tests.
//!
//! Tests for argument parsing and command handling.

use std::path::PathBuf;

use clap::Parser;
use oidc_op_checks::cli::args::{Cli, Command, OutputFormat};

fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(std::iter::once("oidc-op-check").chain(args.iter().copied()))
}

#[test]
fn test_list_command() {
    assert!(matches!(parse(&["list"]).unwrap().command, Command::List(_)));
}

#[test]
fn test_run_command_flags() {
    let cli = parse(&[
        "run",
        "--conversation",
        "recorded.json",
        "--flow",
        "flow.json",
        "--format",
        "json",
        "--quiet",
        "--no-color",
    ])
    .unwrap();
    let Command::Run(args) = cli.command else {
        panic!("expected run command");
    };
    assert_eq!(args.conversation, PathBuf::from("recorded.json"));
    assert_eq!(args.flow, Some(PathBuf::from("flow.json")));
    assert_eq!(args.format, OutputFormat::Json);
    assert!(args.quiet);
    assert!(args.no_color);
    assert!(!args.fail_fast);
}

#[test]
fn test_run_requires_conversation() {
    assert!(parse(&["run", "--check", "verify-state"]).is_err());
}

#[test]
fn test_no_subcommand_is_an_error() {
    assert!(parse(&[]).is_err());
}

#[test]
fn test_unknown_option() {
    assert!(parse(&["list", "--unknown"]).is_err());
}

#[test]
fn test_flow_from_check_list_resolves() {
    let cli = parse(&["run", "-c", "c.json", "--check", "verify-state", "--check", "verify-response"]).unwrap();
    let Command::Run(args) = cli.command else {
        panic!("expected run command");
    };
    let flow = args.flow().unwrap();
    let registry = oidc_op_checks::Registry::standard();
    assert!(flow.steps().iter().all(|s| registry.contains(&s.id)));
}
