//! Wire types for the digital twins service.
//!
//! Field names follow the service's JSON shapes: system properties carry a
//! `$` prefix (`$dtId`, `$metadata`, `$relationshipId`, ...) and user
//! properties are flattened into the same object.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ── Models ────────────────────────────────────────────────────────

/// A DTDL model document as read from local storage.
///
/// The document is kept verbatim for upload; only its `@id` is extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDocument {
    id: String,
    body: Value,
}

impl ModelDocument {
    /// Parse a model document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let body: Value = serde_json::from_str(text)?;
        Self::from_value(body)
    }

    /// Wrap an already-parsed document. It must be an object with a string `@id`.
    pub fn from_value(body: Value) -> Result<Self, CoreError> {
        let id = match body.get("@id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(_) => {
                return Err(CoreError::InvalidModel(
                    "`@id` must be a non-empty string".to_string(),
                ))
            }
            None => {
                return Err(CoreError::InvalidModel(
                    "document has no `@id` field".to_string(),
                ))
            }
        };
        Ok(Self { id, body })
    }

    /// Read and parse a model document from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

impl Serialize for ModelDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

/// A model as registered with the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelData {
    pub id: String,
    /// Language code → display name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub display_name: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub description: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decommissioned: bool,
    /// Full model body, only present when explicitly requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
}

impl ModelData {
    /// Registration record for a freshly uploaded document.
    pub fn registered(document: &ModelDocument, upload_time: DateTime<Utc>) -> Self {
        Self {
            id: document.id().to_string(),
            display_name: HashMap::new(),
            description: HashMap::new(),
            upload_time: Some(upload_time),
            decommissioned: false,
            model: Some(document.body().clone()),
        }
    }
}

// ── Twins ─────────────────────────────────────────────────────────

/// Metadata attached to every twin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TwinMetadata {
    #[serde(rename = "$model")]
    pub model_id: String,
    #[serde(
        rename = "$lastUpdateTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update_time: Option<DateTime<Utc>>,
    /// Per-property metadata (`lastUpdateTime`, `sourceTime`, ...).
    #[serde(flatten)]
    pub property_metadata: Map<String, Value>,
}

/// A digital twin: an entity instance conforming to a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigitalTwin {
    #[serde(rename = "$dtId")]
    pub id: String,
    #[serde(rename = "$etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "$metadata")]
    pub metadata: TwinMetadata,
    /// User-defined properties, flattened into the twin object.
    #[serde(flatten)]
    pub contents: Map<String, Value>,
}

impl DigitalTwin {
    pub fn new(id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            etag: None,
            metadata: TwinMetadata {
                model_id: model_id.into(),
                last_update_time: None,
                property_metadata: Map::new(),
            },
            contents: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.contents.insert(name.into(), value.into());
        self
    }

    pub fn model_id(&self) -> &str {
        &self.metadata.model_id
    }
}

// ── Relationships ─────────────────────────────────────────────────

/// Deterministic relationship id: `{source}-{name}->{target}`.
pub fn relationship_id(source_id: &str, name: &str, target_id: &str) -> String {
    format!("{source_id}-{name}->{target_id}")
}

/// A directed, named edge between two twins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    #[serde(rename = "$relationshipId")]
    pub id: String,
    #[serde(rename = "$sourceId")]
    pub source_id: String,
    #[serde(rename = "$targetId")]
    pub target_id: String,
    #[serde(rename = "$relationshipName")]
    pub name: String,
    #[serde(rename = "$etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Relationship {
    /// Build a relationship whose id is derived from its endpoints and name.
    pub fn new(
        source_id: impl Into<String>,
        name: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        let source_id = source_id.into();
        let name = name.into();
        let target_id = target_id.into();
        Self {
            id: relationship_id(&source_id, &name, &target_id),
            source_id,
            target_id,
            name,
            etag: None,
            properties: Map::new(),
        }
    }
}
