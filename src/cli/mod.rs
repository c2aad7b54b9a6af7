//! CLI module for argument parsing and output formatting.

pub mod args;
pub mod output;

use crate::engine::result::Report;

/// Process exit code for a finished run.
///
/// 0 when everything passed, 2 for warnings only, 1 for anything at
/// `Error` or above. 3 is reserved for runtime and configuration errors.
pub fn exit_code(report: &Report) -> u8 {
    let summary = report.summary();
    if summary.failed() > 0 {
        1
    } else if summary.warning > 0 {
        2
    } else {
        0
    }
}
