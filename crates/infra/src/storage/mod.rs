//! Secret store backends
//!
//! Both backends persist the whole [`TokenSet`](credbroker_core::TokenSet)
//! as a single JSON document so a reader never observes a half-written pair.

pub mod file_store;
pub mod keychain_store;

pub use file_store::FileSecretStore;
pub use keychain_store::KeychainSecretStore;
