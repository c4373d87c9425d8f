//! The remote boundary as a trait, so workflows run against the REST client
//! or an in-process double.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use dtwin_core::{DigitalTwin, ModelData, ModelDocument, Relationship};

use crate::client::{DigitalTwinsClient, TwinsError};

/// Operations of a digital twins instance.
///
/// Listing operations return lazy streams; each item is either a value or
/// the error that ended the listing.
#[async_trait]
pub trait TwinService: Send + Sync {
    async fn get_model(&self, model_id: &str) -> Result<ModelData, TwinsError>;

    async fn create_models(&self, models: &[ModelDocument]) -> Result<Vec<ModelData>, TwinsError>;

    fn list_models(&self) -> BoxStream<'_, Result<ModelData, TwinsError>>;

    async fn upsert_twin(&self, twin: &DigitalTwin) -> Result<DigitalTwin, TwinsError>;

    async fn upsert_relationship(
        &self,
        relationship: &Relationship,
    ) -> Result<Relationship, TwinsError>;

    fn list_relationships(&self, source_id: &str)
        -> BoxStream<'_, Result<Relationship, TwinsError>>;

    fn query(&self, query: &str) -> BoxStream<'_, Result<Value, TwinsError>>;
}

#[async_trait]
impl TwinService for DigitalTwinsClient {
    async fn get_model(&self, model_id: &str) -> Result<ModelData, TwinsError> {
        DigitalTwinsClient::get_model(self, model_id).await
    }

    async fn create_models(&self, models: &[ModelDocument]) -> Result<Vec<ModelData>, TwinsError> {
        DigitalTwinsClient::create_models(self, models).await
    }

    fn list_models(&self) -> BoxStream<'_, Result<ModelData, TwinsError>> {
        DigitalTwinsClient::list_models(self)
    }

    async fn upsert_twin(&self, twin: &DigitalTwin) -> Result<DigitalTwin, TwinsError> {
        DigitalTwinsClient::upsert_twin(self, twin).await
    }

    async fn upsert_relationship(
        &self,
        relationship: &Relationship,
    ) -> Result<Relationship, TwinsError> {
        DigitalTwinsClient::upsert_relationship(self, relationship).await
    }

    fn list_relationships(
        &self,
        source_id: &str,
    ) -> BoxStream<'_, Result<Relationship, TwinsError>> {
        DigitalTwinsClient::list_relationships(self, source_id)
    }

    fn query(&self, query: &str) -> BoxStream<'_, Result<Value, TwinsError>> {
        DigitalTwinsClient::query(self, query)
    }
}
