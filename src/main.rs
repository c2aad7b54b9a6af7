//! oidc-op-check CLI entry point
//!
//! Replays a recorded OpenID Connect conversation through a flow of
//! conformance checks.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use oidc_op_checks::cli::args::{Cli, Command, ListArgs, RunArgs};
use oidc_op_checks::cli::exit_code;
use oidc_op_checks::cli::output::{format_check, format_check_list, get_formatter};
use oidc_op_checks::version::get_build_info;
use oidc_op_checks::{run_flow, Conversation, Registry};

const RUNTIME_ERROR: u8 = 3;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            // --help
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(RUNTIME_ERROR);
        }
    };

    let verbose = matches!(&cli.command, Command::Run(args) if args.verbose);
    init_tracing(verbose);

    match cli.command {
        Command::Run(args) => run_checks(&args),
        Command::List(args) => {
            print_check_list(&args);
            ExitCode::SUCCESS
        }
        Command::Describe { id } => describe(&id),
        Command::Version => {
            println!("{}", get_build_info());
            ExitCode::SUCCESS
        }
    }
}

/// Logs go to stderr so the report on stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "oidc_op_checks=debug" } else { "oidc_op_checks=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn print_check_list(args: &ListArgs) {
    let defs: Vec<_> = Registry::standard()
        .all()
        .into_iter()
        .filter(|d| args.category.map_or(true, |c| d.category == c))
        .collect();
    print!("{}", format_check_list(&defs));
}

fn describe(id: &str) -> ExitCode {
    match Registry::standard().resolve(id) {
        Ok(def) => {
            print!("{}", format_check(def));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run 'oidc-op-check list' for the available checks.");
            ExitCode::from(RUNTIME_ERROR)
        }
    }
}

fn run_checks(args: &RunArgs) -> ExitCode {
    let conversation = match Conversation::load(&args.conversation) {
        Ok(conv) => conv,
        Err(e) => {
            error!(error = %e, "failed to load conversation");
            eprintln!("Error loading conversation: {}", e);
            return ExitCode::from(RUNTIME_ERROR);
        }
    };

    let flow = match args.flow() {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("Error loading flow: {}", e);
            return ExitCode::from(RUNTIME_ERROR);
        }
    };

    let report = match run_flow(conversation, &flow, args.run_config()) {
        Ok((report, _)) => report,
        Err(e) => {
            eprintln!("Error running checks: {}", e);
            return ExitCode::from(RUNTIME_ERROR);
        }
    };

    let formatter = get_formatter(args.format, args.no_color, args.verbose, args.quiet);
    println!("{}", formatter.format(&report));

    ExitCode::from(exit_code(&report))
}
