//! Common utilities shared across credbroker crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - (always on): errors and error classification, wall-clock abstraction
//! - `platform`: platform keychain integration via `keyring`
//! - `test-utils`: in-memory keychain double for downstream tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod error;
pub mod security;
pub mod time;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "test-utils", test))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "platform")]
pub use security::KeychainProvider;
pub use security::{KeychainBackend, KeychainError};
pub use time::{Clock, MockClock, SystemClock};
