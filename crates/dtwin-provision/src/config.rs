//! Configuration for the dtwin-provision workflow.

use std::path::PathBuf;

use serde::Deserialize;

use dtwin_client::{AuthConfig, TwinsConfig};
use dtwin_core::config::{load_settings, section};

use crate::error::Result;

/// What to provision.
///
/// Loaded from the `[provision]` section of `dtwin.toml` or
/// `DTWIN__PROVISION__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    /// DTDL model document to register.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Twin ids are `{twin_prefix}{i}`.
    #[serde(default = "default_twin_prefix")]
    pub twin_prefix: String,

    #[serde(default = "default_twin_count")]
    pub twin_count: usize,

    /// Name of the relationships linking the first twin to the others.
    #[serde(default = "default_relationship_name")]
    pub relationship_name: String,

    /// Query run at the end of the workflow.
    #[serde(default = "default_query")]
    pub query: String,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/SampleModel.json")
}

fn default_twin_prefix() -> String {
    "sampleTwin-".to_string()
}

fn default_twin_count() -> usize {
    3
}

fn default_relationship_name() -> String {
    crate::relationship::CONTAINS.to_string()
}

fn default_query() -> String {
    "SELECT * FROM digitaltwins".to_string()
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            twin_prefix: default_twin_prefix(),
            twin_count: default_twin_count(),
            relationship_name: default_relationship_name(),
            query: default_query(),
        }
    }
}

impl ProvisionConfig {
    /// Ids of the twins this configuration creates, in creation order.
    pub fn twin_ids(&self) -> Vec<String> {
        (0..self.twin_count)
            .map(|i| format!("{}{i}", self.twin_prefix))
            .collect()
    }
}

/// All settings the binary needs.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub service: TwinsConfig,
    pub auth: AuthConfig,
    pub provision: ProvisionConfig,
}

impl Settings {
    /// Load `[service]`, `[auth]`, and `[provision]` from the config file and
    /// environment. Absent sections take their defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let settings = load_settings(file_prefix)?;
        Ok(Self {
            service: section(&settings, "service")?,
            auth: section(&settings, "auth")?,
            provision: section(&settings, "provision")?,
        })
    }
}
