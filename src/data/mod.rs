//! Static reference data for the checks.
//!
//! Scope to claim mapping from OpenID Connect Core and the JOSE algorithm
//! registries used to judge advertised provider metadata.

pub mod algorithms;
pub mod scopes;
