//! Output formatting for oidc-op-check.
//!
//! Provides terminal, JSON, and JUnit XML output formatters, plus the
//! renderings used by `list` and `describe`.
//!
//! All formatters produce valid output for any report, including an empty
//! one or one cut short by an interaction or `--fail-fast`.

use chrono::{DateTime, SecondsFormat};
use serde_json::json;

use super::args::OutputFormat;
use crate::engine::registry::CheckDef;
use crate::engine::result::{CheckRecord, Report};
use crate::{CheckCategory, Status};

/// Trait for output formatters
pub trait OutputFormatter {
    /// Format a report into a string
    fn format(&self, report: &Report) -> String;
}

const RULE: &str = "--------------------------------------------------------------------------------";

/// Terminal (human-readable) formatter
pub struct TerminalFormatter {
    color: bool,
    verbose: bool,
    quiet: bool,
}

impl TerminalFormatter {
    pub fn new(color: bool, verbose: bool, quiet: bool) -> Self {
        TerminalFormatter { color, verbose, quiet }
    }

    fn colorize(&self, text: &str, color_code: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", color_code, text)
        } else {
            text.to_string()
        }
    }

    fn tag(&self, status: Status) -> String {
        match status {
            Status::Ok => self.colorize("[ OK ]", "32"),
            Status::Information => self.colorize("[INFO]", "36"),
            Status::Warning => self.colorize("[WARN]", "33"),
            Status::Error => self.colorize("[FAIL]", "31"),
            Status::Critical => self.colorize("[CRIT]", "1;31"),
            Status::Interaction => self.colorize("[USER]", "35"),
        }
    }

    fn line(&self, record: &CheckRecord) -> String {
        let message = record.outcome.message.as_deref().unwrap_or("passed");
        let mut line = format!("  {} {}: {} ({})", self.tag(record.status()), record.id, record.name, message);
        if self.verbose {
            line.push_str(&self.colorize(&format!(" {}ms", record.duration_ms), "90"));
            for (key, value) in &record.outcome.detail {
                line.push_str(&format!("\n         {}: {}", key, value));
            }
        }
        line
    }
}

impl OutputFormatter for TerminalFormatter {
    fn format(&self, report: &Report) -> String {
        let mut output = String::new();

        output.push_str(RULE);
        output.push('\n');
        output.push_str("oidc-op-check conformance report\n");
        output.push_str(&format!("Timestamp: {}\n", format_timestamp(report.timestamp)));
        output.push_str(RULE);
        output.push_str("\n\n");

        for category in CheckCategory::ALL {
            let records: Vec<&CheckRecord> = report
                .checks
                .iter()
                .filter(|r| r.category == category)
                .filter(|r| !self.quiet || !r.outcome.is_pass())
                .collect();

            if records.is_empty() {
                continue;
            }

            output.push_str(&format!("{} CHECKS\n", category.to_string().to_uppercase()));
            for record in records {
                output.push_str(&self.line(record));
                output.push('\n');
            }
            output.push('\n');
        }

        let summary = report.summary();
        output.push_str(RULE);
        output.push('\n');
        output.push_str(&format!(
            "SUMMARY: {} passed, {} warnings, {} failed ({} total)\n",
            summary.passed(),
            summary.warning,
            summary.failed(),
            summary.total
        ));
        if let Some(id) = &report.halted_at {
            output.push_str(&format!("Run halted after: {}\n", id));
        }
        output.push_str(&format!("Total time: {:.3}s\n", report.total_duration_ms as f64 / 1000.0));

        let code = super::exit_code(report);
        let exit_desc = match code {
            1 => "failures detected",
            2 => "warnings detected",
            _ => "all checks passed",
        };
        output.push_str(&format!("Exit code: {} ({})\n", code, exit_desc));
        output.push_str(RULE);

        output
    }
}

/// JSON formatter
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        JsonFormatter { pretty }
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, report: &Report) -> String {
        let mut doc = json!({
            "timestamp": report.timestamp,
            "total_duration_ms": report.total_duration_ms,
            "worst_status": report.worst_status(),
            "summary": report.summary(),
            "checks": report.checks,
        });
        if let (Some(id), Some(obj)) = (&report.halted_at, doc.as_object_mut()) {
            obj.insert("halted_at".to_string(), json!(id));
        }

        let rendered = if self.pretty {
            serde_json::to_string_pretty(&doc)
        } else {
            serde_json::to_string(&doc)
        };
        rendered.unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string())
    }
}

/// JUnit XML formatter
#[derive(Default)]
pub struct JunitFormatter;

impl JunitFormatter {
    pub fn new() -> Self {
        JunitFormatter
    }

    fn escape_xml(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '&' => result.push_str("&amp;"),
                '<' => result.push_str("&lt;"),
                '>' => result.push_str("&gt;"),
                '"' => result.push_str("&quot;"),
                '\'' => result.push_str("&apos;"),
                c => result.push(c),
            }
        }
        result
    }

    fn testcase(record: &CheckRecord, suite_name: &str) -> String {
        let mut case = format!(
            "    <testcase name=\"{}\" classname=\"oidc-op-check.{}\" time=\"{:.3}\"",
            Self::escape_xml(&record.id),
            suite_name,
            record.duration_ms as f64 / 1000.0
        );
        let message = Self::escape_xml(record.outcome.message.as_deref().unwrap_or(""));
        match record.status() {
            Status::Ok if record.outcome.message.is_none() => case.push_str(" />\n"),
            Status::Ok | Status::Information => {
                case.push_str(&format!(">\n      <system-out>{}</system-out>\n    </testcase>\n", message));
            }
            Status::Warning => {
                case.push_str(&format!(
                    ">\n      <system-out>WARNING: {}</system-out>\n    </testcase>\n",
                    message
                ));
            }
            status => {
                case.push_str(&format!(
                    ">\n      <failure message=\"{}\" type=\"{}\">{}</failure>\n    </testcase>\n",
                    message,
                    status,
                    Self::escape_xml(&serde_json::Value::Object(record.outcome.detail.clone()).to_string())
                ));
            }
        }
        case
    }
}

impl OutputFormatter for JunitFormatter {
    fn format(&self, report: &Report) -> String {
        let mut output = String::new();
        output.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

        let summary = report.summary();
        output.push_str(&format!(
            "<testsuites tests=\"{}\" failures=\"{}\" errors=\"0\" time=\"{:.3}\">\n",
            summary.total,
            summary.failed(),
            report.total_duration_ms as f64 / 1000.0
        ));

        for category in CheckCategory::ALL {
            let records: Vec<&CheckRecord> = report.checks.iter().filter(|r| r.category == category).collect();
            if records.is_empty() {
                continue;
            }

            let suite_name = category.to_string().to_lowercase();
            let suite_failures = records.iter().filter(|r| r.status() >= Status::Error).count();
            let suite_time: u64 = records.iter().map(|r| r.duration_ms).sum();

            output.push_str(&format!(
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\" time=\"{:.3}\">\n",
                suite_name,
                records.len(),
                suite_failures,
                suite_time as f64 / 1000.0
            ));
            for record in records {
                output.push_str(&Self::testcase(record, &suite_name));
            }
            output.push_str("  </testsuite>\n");
        }

        output.push_str("</testsuites>");
        output
    }
}

/// Get a formatter based on the output format
pub fn get_formatter(format: OutputFormat, no_color: bool, verbose: bool, quiet: bool) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => Box::new(TerminalFormatter::new(!no_color, verbose, quiet)),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Junit => Box::new(JunitFormatter::new()),
    }
}

/// Catalog listing grouped by category, as printed by `list`.
pub fn format_check_list(defs: &[&CheckDef]) -> String {
    let mut output = String::from("Available checks:\n");
    for category in CheckCategory::ALL {
        let in_category: Vec<&&CheckDef> = defs.iter().filter(|d| d.category == category).collect();
        if in_category.is_empty() {
            continue;
        }
        output.push_str(&format!("\n{} CHECKS:\n", category.to_string().to_uppercase()));
        for def in in_category {
            let marker = if def.takes_params() { "*" } else { " " };
            output.push_str(&format!("  {:<48}{} {}\n", def.id, marker, def.name));
        }
    }
    output.push_str("\n* takes parameters\n");
    output
}

pub fn format_check(def: &CheckDef) -> String {
    format!(
        "{}\n  Name:        {}\n  Category:    {}\n  Severity:    {}\n  Parameters:  {}\n  {}\n",
        def.id,
        def.name,
        def.category,
        def.severity,
        if def.takes_params() { "yes" } else { "no" },
        def.description
    )
}

/// Format a Unix timestamp as ISO 8601
fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| timestamp.to_string())
}
