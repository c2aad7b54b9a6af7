//! Test doubles for replaying conversations without a live OP.
//!
//! Provides a builder for recorded conversations and a key-set fetcher that
//! serves canned responses.

pub mod conversation;
pub mod fetcher;

pub use conversation::*;
pub use fetcher::*;
