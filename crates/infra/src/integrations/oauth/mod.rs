//! OAuth 2.0 provider integration
//!
//! - [`HttpOAuthProvider`]: authorization-code and refresh-token grants
//!   against Microsoft-identity-style endpoints
//! - [`OAuthCallbackServer`]: loopback HTTP listener that receives the
//!   browser redirect

pub mod callback;
pub mod client;

pub use callback::{CallbackParams, OAuthCallbackServer};
pub use client::HttpOAuthProvider;
