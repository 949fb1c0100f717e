//! Nullable infrastructure for deterministic testing.
//!
//! Swap these in for real implementations so tests run instantly and
//! deterministically:
//! - [`NullAuthorization`] issues tokens without proof-of-work

pub mod authorization;

pub use authorization::NullAuthorization;
