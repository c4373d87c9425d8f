//! The provisioning workflow.
//!
//! Each step wraps its remote calls individually: a failed call is printed as
//! `{status}: {message}` and the workflow continues with the next call or
//! step. Nothing is retried.

use std::io::Write;

use futures::StreamExt;
use serde_json::Value;

use dtwin_client::auth::DIGITAL_TWINS_SCOPE;
use dtwin_client::{DigitalTwinsClient, TwinService};
use dtwin_core::{DigitalTwin, ModelDocument};

use crate::config::{ProvisionConfig, Settings};
use crate::console::Console;
use crate::error::Result;
use crate::relationship;

/// Property every sample twin carries, with the same value on each.
const SAMPLE_PROPERTY: (&str, &str) = ("data", "Hello World");

/// Build the client and acquire the first token, so sign-in happens before
/// any workflow step runs.
pub async fn connect(settings: &Settings) -> Result<DigitalTwinsClient> {
    let http = settings.service.http_client()?;
    let credential = settings.auth.build_credential(http.clone())?;
    credential.get_token(DIGITAL_TWINS_SCOPE).await?;
    tracing::info!(method = ?settings.auth.method, "Authenticated");
    Ok(DigitalTwinsClient::new(&settings.service, http, credential)?)
}

/// How the model registration step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOutcome {
    /// Lookup did not report not-found; nothing was uploaded.
    AlreadyPresent,
    Uploaded,
    UploadFailed,
}

/// Counts of what a run did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub model: Option<ModelOutcome>,
    pub models_listed: usize,
    pub twins_created: usize,
    pub twins_failed: usize,
    pub relationships_created: usize,
    pub relationships_failed: usize,
    pub relationships_listed: usize,
    pub query_results: usize,
}

/// Runs the workflow against a [`TwinService`], printing to a [`Console`].
pub struct Provisioner<'a, S: TwinService + ?Sized, W: Write> {
    service: &'a S,
    console: Console<W>,
    config: ProvisionConfig,
}

impl<'a, S: TwinService + ?Sized, W: Write> Provisioner<'a, S, W> {
    pub fn new(service: &'a S, console: Console<W>, config: ProvisionConfig) -> Self {
        Self {
            service,
            console,
            config,
        }
    }

    pub fn into_console(self) -> Console<W> {
        self.console
    }

    /// Run every step in order.
    pub async fn run(&mut self, document: &ModelDocument) -> RunSummary {
        let mut summary = RunSummary {
            model: Some(self.ensure_model(document).await),
            models_listed: self.list_models().await,
            ..Default::default()
        };

        let (created, failed) = self.create_twins(document.id()).await;
        summary.twins_created = created;
        summary.twins_failed = failed;

        let (created, failed, listed) = self.link_twins().await;
        summary.relationships_created = created;
        summary.relationships_failed = failed;
        summary.relationships_listed = listed;

        summary.query_results = self.run_query().await;
        summary
    }

    /// Register the model unless the service already knows its id.
    ///
    /// Only a not-found lookup triggers an upload. Any other lookup failure
    /// is treated like success, and the registered content is never compared
    /// with the local document.
    pub async fn ensure_model(&mut self, document: &ModelDocument) -> ModelOutcome {
        self.console.line("Upload a model");

        match self.service.get_model(document.id()).await {
            Err(e) if e.is_not_found() => {
                tracing::info!(model_id = document.id(), "Model not registered, uploading");
                match self
                    .service
                    .create_models(std::slice::from_ref(document))
                    .await
                {
                    Ok(_) => {
                        self.console
                            .line("Models uploaded to the ADT service instance.");
                        ModelOutcome::Uploaded
                    }
                    Err(e) => {
                        tracing::warn!(model_id = document.id(), error = %e, "Model upload failed");
                        self.console.failure("Upload model", &e);
                        ModelOutcome::UploadFailed
                    }
                }
            }
            outcome => {
                if let Err(e) = outcome {
                    tracing::warn!(model_id = document.id(), error = %e, "Model lookup failed, assuming it is registered");
                }
                self.console
                    .line("Model is already uploaded, skipping upload");
                self.console
                    .line("In case you want to update the model, consider: ");
                self.console
                    .line("     1. Delete the old model and upload a new one.");
                self.console
                    .line("     2. Upload a new version of the model.");
                self.console.blank();
                ModelOutcome::AlreadyPresent
            }
        }
    }

    /// Print the id of every registered model. Returns how many were printed.
    pub async fn list_models(&mut self) -> usize {
        let service = self.service;
        let mut listed = 0;
        let mut models = service.list_models();
        while let Some(item) = models.next().await {
            match item {
                Ok(model) => {
                    self.console.line(format_args!("Model: {}", model.id));
                    listed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Listing models failed");
                    self.console.failure("List models", &e);
                    break;
                }
            }
        }
        listed
    }

    /// Upsert `twin_count` twins with identical content. Each upsert stands
    /// alone; returns (created, failed).
    pub async fn create_twins(&mut self, model_id: &str) -> (usize, usize) {
        let (mut created, mut failed) = (0, 0);
        let (property, value) = SAMPLE_PROPERTY;

        for twin_id in self.config.twin_ids() {
            let twin = DigitalTwin::new(twin_id, model_id).with_property(property, value);
            match self.service.upsert_twin(&twin).await {
                Ok(_) => {
                    self.console.line(format_args!("Created twin: {}", twin.id));
                    created += 1;
                }
                Err(e) => {
                    tracing::warn!(twin_id = %twin.id, error = %e, "Twin creation failed");
                    self.console.failure("Create twin", &e);
                    failed += 1;
                }
            }
        }
        (created, failed)
    }

    /// Link the first twin to every other twin, then list the first twin's
    /// relationships. Returns (created, failed, listed).
    pub async fn link_twins(&mut self) -> (usize, usize, usize) {
        let ids = self.config.twin_ids();
        let Some((source, targets)) = ids.split_first() else {
            return (0, 0, 0);
        };

        let (mut created, mut failed) = (0, 0);
        for target in targets {
            let ok = relationship::create_relationship(
                self.service,
                &mut self.console,
                &self.config.relationship_name,
                source,
                target,
            )
            .await;
            if ok {
                created += 1;
            } else {
                failed += 1;
            }
        }

        let listed = relationship::list_relationships(self.service, &mut self.console, source).await;
        (created, failed, listed)
    }

    /// Run the configured query and print one line per result.
    pub async fn run_query(&mut self) -> usize {
        let service = self.service;
        let mut printed = 0;
        let mut results = service.query(&self.config.query);
        while let Some(item) = results.next().await {
            match item {
                Ok(value) => {
                    self.console.line(result_line(&value));
                    printed += 1;
                }
                Err(e) => {
                    tracing::warn!(query = %self.config.query, error = %e, "Query failed");
                    self.console.failure("Query twin", &e);
                    break;
                }
            }
        }
        printed
    }
}

/// `Twin {id}: {json}` for twins, the bare JSON for projections.
fn result_line(value: &Value) -> String {
    match value.get("$dtId").and_then(Value::as_str) {
        Some(id) => format!("Twin {id}: {value}"),
        None => value.to_string(),
    }
}
