//! External service integrations

pub mod oauth;
