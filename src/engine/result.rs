//! Result aggregation and reporting.
//!
//! Collects check outcomes in flow order and summarizes them by status.

use serde::{Deserialize, Serialize};

use crate::{CheckCategory, Outcome, Status};

/// Outcome of one flow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: String,
    pub name: String,
    pub category: CheckCategory,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub duration_ms: u64,
}

impl CheckRecord {
    pub fn status(&self) -> Status {
        self.outcome.status
    }
}

/// Result summary statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub ok: u32,
    pub information: u32,
    pub warning: u32,
    pub error: u32,
    pub critical: u32,
    pub interaction: u32,
    pub total: u32,
    pub total_duration_ms: u64,
}

impl ResultSummary {
    fn count(&mut self, record: &CheckRecord) {
        self.total += 1;
        self.total_duration_ms += record.duration_ms;
        match record.status() {
            Status::Ok => self.ok += 1,
            Status::Information => self.information += 1,
            Status::Warning => self.warning += 1,
            Status::Error => self.error += 1,
            Status::Critical => self.critical += 1,
            Status::Interaction => self.interaction += 1,
        }
    }

    /// Checks that did not count against the OP.
    pub fn passed(&self) -> u32 {
        self.ok + self.information
    }

    /// Checks at `Error` or above, interaction included.
    pub fn failed(&self) -> u32 {
        self.error + self.critical + self.interaction
    }
}

/// Report of a flow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Seconds since the epoch when the run finished
    pub timestamp: i64,
    pub checks: Vec<CheckRecord>,
    pub total_duration_ms: u64,
    /// Identifier of the check that ended the run early, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<String>,
}

impl Report {
    pub fn new() -> Self {
        Report {
            timestamp: chrono::Utc::now().timestamp(),
            checks: Vec::new(),
            total_duration_ms: 0,
            halted_at: None,
        }
    }

    /// Calculate summary statistics
    pub fn summary(&self) -> ResultSummary {
        let mut summary = ResultSummary::default();
        for record in &self.checks {
            summary.count(record);
        }
        summary
    }

    /// Highest status recorded; `Ok` for an empty report.
    pub fn worst_status(&self) -> Status {
        self.checks
            .iter()
            .map(CheckRecord::status)
            .max()
            .unwrap_or(Status::Ok)
    }

    pub fn get(&self, id: &str) -> Option<&CheckRecord> {
        self.checks.iter().find(|r| r.id == id)
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

/// Result aggregator for collecting check outcomes
#[derive(Debug, Default)]
pub struct ResultAggregator {
    records: Vec<CheckRecord>,
    halted_at: Option<String>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a completed check outcome
    pub fn add_result(&mut self, record: CheckRecord) {
        self.records.push(record);
    }

    /// Record that the run stopped after `id`
    pub fn halt(&mut self, id: &str) {
        self.halted_at = Some(id.to_string());
    }

    /// Check if there are any outcomes at `Error` or above
    pub fn has_failures(&self) -> bool {
        self.records.iter().any(|r| r.status() >= Status::Error)
    }

    pub fn get_summary(&self) -> ResultSummary {
        let mut summary = ResultSummary::default();
        for record in &self.records {
            summary.count(record);
        }
        summary
    }

    /// Get outcomes at `Error` or above
    pub fn get_failures(&self) -> Vec<&CheckRecord> {
        self.records
            .iter()
            .filter(|r| r.status() >= Status::Error)
            .collect()
    }

    pub fn get_warnings(&self) -> Vec<&CheckRecord> {
        self.records
            .iter()
            .filter(|r| r.status() == Status::Warning)
            .collect()
    }

    /// Create the final report
    pub fn into_report(self, total_duration_ms: u64) -> Report {
        Report {
            timestamp: chrono::Utc::now().timestamp(),
            checks: self.records,
            total_duration_ms,
            halted_at: self.halted_at,
        }
    }
}
