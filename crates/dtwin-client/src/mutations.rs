//! Write operations for the twin graph.
//!
//! Twins and relationships use PUT (create-or-replace) semantics, so
//! re-running a provisioning step converges on the same remote state.

use serde::Serialize;
use serde_json::{Map, Value};

use dtwin_core::{DigitalTwin, ModelData, ModelDocument, Relationship};

use crate::client::{DigitalTwinsClient, TwinsError};

/// Relationship body as the service accepts it on PUT. The source and the
/// relationship id travel in the URL.
#[derive(Serialize)]
struct RelationshipBody<'a> {
    #[serde(rename = "$targetId")]
    target_id: &'a str,
    #[serde(rename = "$relationshipName")]
    name: &'a str,
    #[serde(flatten)]
    properties: &'a Map<String, Value>,
}

impl DigitalTwinsClient {
    // ── Models ───────────────────────────────────────────────────

    /// Register one or more model documents in a single call.
    pub async fn create_models(
        &self,
        models: &[ModelDocument],
    ) -> Result<Vec<ModelData>, TwinsError> {
        let url = self.url(&["models"])?;
        let created: Vec<ModelData> = self.send_json(self.http.post(url).json(models)).await?;
        tracing::info!(count = created.len(), "Models registered");
        Ok(created)
    }

    // ── Twins ────────────────────────────────────────────────────

    /// Create or replace a twin by id. Returns the twin as stored.
    pub async fn upsert_twin(&self, twin: &DigitalTwin) -> Result<DigitalTwin, TwinsError> {
        let url = self.url(&["digitaltwins", &twin.id])?;
        let stored: DigitalTwin = self.send_json(self.http.put(url).json(twin)).await?;
        tracing::debug!(twin_id = %stored.id, etag = ?stored.etag, "Twin upserted");
        Ok(stored)
    }

    // ── Relationships ────────────────────────────────────────────

    /// Create or replace a relationship under its id on the source twin.
    pub async fn upsert_relationship(
        &self,
        relationship: &Relationship,
    ) -> Result<Relationship, TwinsError> {
        let url = self.url(&[
            "digitaltwins",
            &relationship.source_id,
            "relationships",
            &relationship.id,
        ])?;
        let body = RelationshipBody {
            target_id: &relationship.target_id,
            name: &relationship.name,
            properties: &relationship.properties,
        };
        let stored: Relationship = self.send_json(self.http.put(url).json(&body)).await?;
        tracing::debug!(relationship_id = %stored.id, "Relationship upserted");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relationship_body_omits_url_fields() {
        let mut rel = Relationship::new("sampleTwin-0", "contains", "sampleTwin-1");
        rel.properties.insert("weight".into(), json!(2));

        let body = RelationshipBody {
            target_id: &rel.target_id,
            name: &rel.name,
            properties: &rel.properties,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "$targetId": "sampleTwin-1",
                "$relationshipName": "contains",
                "weight": 2
            })
        );
    }
}
