//! Security primitives
//!
//! Platform keychain access behind the [`KeychainBackend`] seam so that
//! credential stores can be exercised against an in-memory double.

pub mod keychain;

#[cfg(feature = "platform")]
pub use keychain::KeychainProvider;
pub use keychain::{KeychainBackend, KeychainError};
