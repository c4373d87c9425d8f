//! dtwin-client: Digital twins service client.
//!
//! This crate is the single boundary to the remote service. Every model,
//! twin, relationship, and query call flows through [`TwinService`], which
//! [`DigitalTwinsClient`] implements over the REST data plane and
//! [`memory::InMemoryTwinService`] implements in process for tests.

pub mod auth;
pub mod client;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AccessToken, AuthConfig, AuthError, AuthMethod, TokenCredential};
pub use client::{DigitalTwinsClient, TwinsConfig, TwinsError};
pub use service::TwinService;
