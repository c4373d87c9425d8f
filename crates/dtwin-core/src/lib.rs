//! dtwin-core: Shared types, configuration, and error handling for dtwin.
//!
//! This crate provides the foundational types used across all dtwin components:
//! - Model documents (DTDL) read from local storage
//! - Wire types for models, twins, and relationships as the service returns them
//! - Relationship id derivation
//! - Layered settings loading
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use error::CoreError;
pub use types::{
    relationship_id, DigitalTwin, ModelData, ModelDocument, Relationship, TwinMetadata,
};
