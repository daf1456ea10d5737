//! Testing utilities
//!
//! In-memory doubles for the authorization ports. Available under the
//! `test-utils` feature so adapter crates can drive the core in their own
//! tests.

pub mod mocks;

pub use mocks::{MockOAuthProvider, MockSecretStore};
