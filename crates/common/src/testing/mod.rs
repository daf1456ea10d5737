//! Testing utilities
//!
//! In-memory doubles for code that sits on top of the platform keychain.
//! Available under the `test-utils` feature.

pub mod mocks;

pub use mocks::MockKeychainProvider;
