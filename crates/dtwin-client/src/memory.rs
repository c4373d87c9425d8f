//! In-process twin service for tests.
//!
//! Keeps models, twins, and relationships in memory with the same not-found
//! and validation behavior the service shows for the calls the provisioning
//! workflow makes. Individual calls can be made to fail with a chosen status.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;

use dtwin_core::{DigitalTwin, ModelData, ModelDocument, Relationship};

use crate::client::TwinsError;
use crate::service::TwinService;

/// A canned service failure.
#[derive(Debug, Clone)]
pub struct Failure {
    pub status: u16,
    pub message: String,
}

impl Failure {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn to_error(&self) -> TwinsError {
        TwinsError::Service {
            status: self.status,
            code: None,
            message: self.message.clone(),
        }
    }
}

/// How many times each operation was called.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_model: usize,
    pub create_models: usize,
    pub list_models: usize,
    pub upsert_twin: usize,
    pub upsert_relationship: usize,
    pub list_relationships: usize,
    pub query: usize,
}

#[derive(Default)]
struct Failures {
    get_model: Option<Failure>,
    create_models: Option<Failure>,
    list_models: Option<Failure>,
    twins: HashMap<String, Failure>,
    relationships: HashMap<String, Failure>,
    list_relationships: Option<Failure>,
    query: Option<Failure>,
}

#[derive(Default)]
struct State {
    models: BTreeMap<String, ModelData>,
    twins: BTreeMap<String, DigitalTwin>,
    /// Keyed by (source id, relationship id).
    relationships: BTreeMap<(String, String), Relationship>,
    failures: Failures,
    calls: CallCounts,
}

/// In-memory [`TwinService`].
#[derive(Default)]
pub struct InMemoryTwinService {
    state: Mutex<State>,
}

impl InMemoryTwinService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Seeding ──────────────────────────────────────────────────

    /// Pre-register a model.
    pub fn with_model(self, document: &ModelDocument) -> Self {
        self.state().models.insert(
            document.id().to_string(),
            ModelData::registered(document, Utc::now()),
        );
        self
    }

    // ── Failure injection ────────────────────────────────────────

    pub fn fail_get_model(self, failure: Failure) -> Self {
        self.state().failures.get_model = Some(failure);
        self
    }

    pub fn fail_create_models(self, failure: Failure) -> Self {
        self.state().failures.create_models = Some(failure);
        self
    }

    pub fn fail_list_models(self, failure: Failure) -> Self {
        self.state().failures.list_models = Some(failure);
        self
    }

    /// Fail the upsert of one twin id.
    pub fn fail_twin(self, twin_id: &str, failure: Failure) -> Self {
        self.state()
            .failures
            .twins
            .insert(twin_id.to_string(), failure);
        self
    }

    /// Fail the upsert of one relationship id.
    pub fn fail_relationship(self, relationship_id: &str, failure: Failure) -> Self {
        self.state()
            .failures
            .relationships
            .insert(relationship_id.to_string(), failure);
        self
    }

    pub fn fail_list_relationships(self, failure: Failure) -> Self {
        self.state().failures.list_relationships = Some(failure);
        self
    }

    pub fn fail_query(self, failure: Failure) -> Self {
        self.state().failures.query = Some(failure);
        self
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn models(&self) -> Vec<ModelData> {
        self.state().models.values().cloned().collect()
    }

    /// Stored twins, ordered by id.
    pub fn twins(&self) -> Vec<DigitalTwin> {
        self.state().twins.values().cloned().collect()
    }

    /// Stored relationships, ordered by (source, id).
    pub fn relationships(&self) -> Vec<Relationship> {
        self.state().relationships.values().cloned().collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }
}

fn not_found(code: &str, message: String) -> TwinsError {
    TwinsError::Service {
        status: 404,
        code: Some(code.to_string()),
        message,
    }
}

fn bad_request(code: &str, message: String) -> TwinsError {
    TwinsError::Service {
        status: 400,
        code: Some(code.to_string()),
        message,
    }
}

fn is_select_all(query: &str) -> bool {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.eq_ignore_ascii_case("SELECT * FROM digitaltwins")
}

#[async_trait]
impl TwinService for InMemoryTwinService {
    async fn get_model(&self, model_id: &str) -> Result<ModelData, TwinsError> {
        let mut state = self.state();
        state.calls.get_model += 1;
        if let Some(f) = &state.failures.get_model {
            return Err(f.to_error());
        }
        state.models.get(model_id).cloned().ok_or_else(|| {
            not_found(
                "ModelNotFound",
                format!("There is no Model(s) available that matches the provided id(s) {model_id}."),
            )
        })
    }

    async fn create_models(&self, models: &[ModelDocument]) -> Result<Vec<ModelData>, TwinsError> {
        let mut state = self.state();
        state.calls.create_models += 1;
        if let Some(f) = &state.failures.create_models {
            return Err(f.to_error());
        }
        if let Some(existing) = models.iter().find(|m| state.models.contains_key(m.id())) {
            return Err(TwinsError::Service {
                status: 409,
                code: Some("ModelIdAlreadyExists".into()),
                message: format!("Model with id {} already exists.", existing.id()),
            });
        }

        let now = Utc::now();
        let created: Vec<ModelData> = models
            .iter()
            .map(|m| ModelData::registered(m, now))
            .collect();
        for data in &created {
            state.models.insert(data.id.clone(), data.clone());
        }
        Ok(created)
    }

    fn list_models(&self) -> BoxStream<'_, Result<ModelData, TwinsError>> {
        let mut state = self.state();
        state.calls.list_models += 1;
        let mut items: Vec<Result<ModelData, TwinsError>> =
            state.models.values().cloned().map(Ok).collect();
        if let Some(f) = &state.failures.list_models {
            items.push(Err(f.to_error()));
        }
        stream::iter(items).boxed()
    }

    async fn upsert_twin(&self, twin: &DigitalTwin) -> Result<DigitalTwin, TwinsError> {
        let mut state = self.state();
        state.calls.upsert_twin += 1;
        if let Some(f) = state.failures.twins.get(&twin.id) {
            return Err(f.to_error());
        }
        if !state.models.contains_key(twin.model_id()) {
            return Err(bad_request(
                "ModelNotFound",
                format!("Model {} is not registered.", twin.model_id()),
            ));
        }

        let mut stored = twin.clone();
        stored.etag = Some(format!("W/\"{}\"", state.calls.upsert_twin));
        stored.metadata.last_update_time = Some(Utc::now());
        state.twins.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn upsert_relationship(
        &self,
        relationship: &Relationship,
    ) -> Result<Relationship, TwinsError> {
        let mut state = self.state();
        state.calls.upsert_relationship += 1;
        if let Some(f) = state.failures.relationships.get(&relationship.id) {
            return Err(f.to_error());
        }
        for twin_id in [&relationship.source_id, &relationship.target_id] {
            if !state.twins.contains_key(twin_id) {
                return Err(not_found(
                    "DigitalTwinNotFound",
                    format!("There is no digital twin instance that exists with the ID {twin_id}."),
                ));
            }
        }

        let mut stored = relationship.clone();
        stored.etag = Some(format!("W/\"{}\"", state.calls.upsert_relationship));
        state.relationships.insert(
            (stored.source_id.clone(), stored.id.clone()),
            stored.clone(),
        );
        Ok(stored)
    }

    fn list_relationships(
        &self,
        source_id: &str,
    ) -> BoxStream<'_, Result<Relationship, TwinsError>> {
        let mut state = self.state();
        state.calls.list_relationships += 1;
        if let Some(f) = &state.failures.list_relationships {
            return stream::iter(vec![Err(f.to_error())]).boxed();
        }
        if !state.twins.contains_key(source_id) {
            let err = not_found(
                "DigitalTwinNotFound",
                format!("There is no digital twin instance that exists with the ID {source_id}."),
            );
            return stream::iter(vec![Err(err)]).boxed();
        }

        let items: Vec<Result<Relationship, TwinsError>> = state
            .relationships
            .values()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(items).boxed()
    }

    fn query(&self, query: &str) -> BoxStream<'_, Result<Value, TwinsError>> {
        let mut state = self.state();
        state.calls.query += 1;
        if let Some(f) = &state.failures.query {
            return stream::iter(vec![Err(f.to_error())]).boxed();
        }
        if !is_select_all(query) {
            let err = bad_request(
                "BadRequest",
                format!("Unsupported query for the in-memory service: {query}"),
            );
            return stream::iter(vec![Err(err)]).boxed();
        }

        let items: Vec<Result<Value, TwinsError>> = state
            .twins
            .values()
            .map(|t| serde_json::to_value(t).map_err(TwinsError::from))
            .collect();
        stream::iter(items).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn sample_model() -> ModelDocument {
        ModelDocument::from_json(r#"{"@id": "dtmi:example:Sample;1", "@type": "Interface"}"#)
            .unwrap()
    }

    #[tokio::test]
    async fn missing_model_is_not_found() {
        let service = InMemoryTwinService::new();
        let err = service.get_model("dtmi:example:Missing;1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn duplicate_model_conflicts() {
        let model = sample_model();
        let service = InMemoryTwinService::new().with_model(&model);
        let err = service.create_models(&[model]).await.unwrap_err();
        assert_eq!(err.status(), 409);
    }

    #[tokio::test]
    async fn twin_requires_registered_model() {
        let service = InMemoryTwinService::new();
        let twin = DigitalTwin::new("t-0", "dtmi:example:Sample;1");
        let err = service.upsert_twin(&twin).await.unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn upsert_replaces_twin() {
        let model = sample_model();
        let service = InMemoryTwinService::new().with_model(&model);

        let twin = DigitalTwin::new("t-0", model.id()).with_property("data", "one");
        service.upsert_twin(&twin).await.unwrap();
        let twin = twin.with_property("data", "two");
        let stored = service.upsert_twin(&twin).await.unwrap();

        assert!(stored.etag.is_some());
        let twins = service.twins();
        assert_eq!(twins.len(), 1);
        assert_eq!(twins[0].contents["data"], "two");
    }

    #[tokio::test]
    async fn relationship_requires_both_twins() {
        let model = sample_model();
        let service = InMemoryTwinService::new().with_model(&model);
        service
            .upsert_twin(&DigitalTwin::new("a", model.id()))
            .await
            .unwrap();

        let err = service
            .upsert_relationship(&Relationship::new("a", "contains", "b"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn lists_only_outgoing_relationships() {
        let model = sample_model();
        let service = InMemoryTwinService::new().with_model(&model);
        for id in ["a", "b", "c"] {
            service
                .upsert_twin(&DigitalTwin::new(id, model.id()))
                .await
                .unwrap();
        }
        for (src, dst) in [("a", "b"), ("a", "c"), ("b", "c")] {
            service
                .upsert_relationship(&Relationship::new(src, "contains", dst))
                .await
                .unwrap();
        }

        let from_a: Vec<Relationship> = service.list_relationships("a").try_collect().await.unwrap();
        assert_eq!(from_a.len(), 2);
        assert!(from_a.iter().all(|r| r.source_id == "a"));
    }

    #[tokio::test]
    async fn query_supports_select_all_only() {
        let model = sample_model();
        let service = InMemoryTwinService::new().with_model(&model);
        service
            .upsert_twin(&DigitalTwin::new("a", model.id()))
            .await
            .unwrap();

        let rows: Vec<Value> = service
            .query("select *   from DigitalTwins")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["$dtId"], "a");

        let err = service
            .query("SELECT T FROM digitaltwins T WHERE T.data = 'x'")
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn injected_failure_ends_listing() {
        let model = sample_model();
        let service = InMemoryTwinService::new()
            .with_model(&model)
            .fail_list_models(Failure::new(500, "Internal"));

        let items: Vec<Result<ModelData, TwinsError>> = service.list_models().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().status(), 500);
    }
}
