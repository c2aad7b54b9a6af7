//! Integration tests for oidc-op-checks.
//!
//! These tests replay recorded conversations through the standard registry.

pub mod check_tests;
pub mod cli_tests;
pub mod flow_tests;
pub mod output_tests;
