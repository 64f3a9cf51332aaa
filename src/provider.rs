//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering the device
//! authorization, token, and introspection endpoints plus provider quirks (scope parameter name,
//! whether scopes accompany token polls, scope delimiter, introspection style).
//! `strategy` defines [`ProviderStrategy`], an HTTP-client-agnostic hook used by the provider
//! client to augment outgoing form requests and map error responses into the engine taxonomy.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
