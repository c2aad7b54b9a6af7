//! Command line arguments for oidc-op-check.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::engine::orchestrator::Flow;
use crate::{CheckCategory, Result, RunConfig};

/// Replay a recorded OpenID Connect conversation through conformance checks.
#[derive(Parser, Debug)]
#[command(name = "oidc-op-check", about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Command to execute
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a flow of checks against a recorded conversation
    Run(RunArgs),
    /// List all available checks
    List(ListArgs),
    /// Show the definition of one check
    Describe {
        /// Check identifier
        id: String,
    },
    /// Print version information
    Version,
}

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Text,
    /// Machine-readable JSON
    Json,
    /// JUnit XML for CI/CD integration
    Junit,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RunArgs {
    /// Recorded conversation (JSON)
    #[arg(long, short = 'c')]
    pub conversation: PathBuf,

    /// Flow file: a list of steps or an object of id to params
    #[arg(long, conflicts_with = "checks")]
    pub flow: Option<PathBuf>,

    /// Check to run without parameters (repeatable)
    #[arg(long = "check", value_name = "ID", required_unless_present = "flow")]
    pub checks: Vec<String>,

    /// Specific checks to skip (by ID)
    #[arg(long, value_name = "ID")]
    pub skip: Vec<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text, env = "OP_CHECK_FORMAT")]
    pub format: OutputFormat,

    /// Stop after the first check at ERROR or above
    #[arg(long)]
    pub fail_fast: bool,

    /// Only output checks that did not pass
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    pub quiet: bool,

    /// Include durations and outcome details
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,
}

impl RunArgs {
    /// The flow to run: the flow file when given, else the `--check` list.
    pub fn flow(&self) -> Result<Flow> {
        match &self.flow {
            Some(path) => Flow::load(path),
            None => Ok(Flow::from_ids(&self.checks)),
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            fail_fast: self.fail_fast,
            skip_checks: self.skip.clone(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct ListArgs {
    /// Only list checks of this category
    #[arg(long, value_parser = parse_category)]
    pub category: Option<CheckCategory>,
}

fn parse_category(s: &str) -> std::result::Result<CheckCategory, String> {
    CheckCategory::ALL
        .into_iter()
        .find(|c| c.to_string().eq_ignore_ascii_case(s))
        .ok_or_else(|| {
            let names: Vec<String> = CheckCategory::ALL.iter().map(|c| c.to_string().to_lowercase()).collect();
            format!("unknown category '{}'. Valid categories: {}", s, names.join(", "))
        })
}
