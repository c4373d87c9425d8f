//! Error types for the dtwin-provision crate.
//!
//! Only setup can fail this way; remote call failures during the workflow
//! are printed, not returned.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Core(#[from] dtwin_core::CoreError),

    #[error("Client error: {0}")]
    Client(#[from] dtwin_client::TwinsError),

    #[error("Authentication error: {0}")]
    Auth(#[from] dtwin_client::AuthError),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
