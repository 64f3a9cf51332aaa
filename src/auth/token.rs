//! Credential material issued by the provider.

pub mod credential;
pub mod secret;
