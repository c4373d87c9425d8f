//! Relationship helpers: create one edge, list a twin's outgoing edges.
//!
//! Both are stateless request/response wrappers that print their outcome.

use std::io::Write;

use futures::StreamExt;

use dtwin_client::TwinService;
use dtwin_core::Relationship;

use crate::console::Console;

/// Default relationship name.
pub const CONTAINS: &str = "contains";

/// Upsert a `name` relationship from `source_id` to `target_id` under its
/// derived id. Returns whether the service accepted it.
pub async fn create_relationship<S, W>(
    service: &S,
    console: &mut Console<W>,
    name: &str,
    source_id: &str,
    target_id: &str,
) -> bool
where
    S: TwinService + ?Sized,
    W: Write,
{
    let relationship = Relationship::new(source_id, name, target_id);
    match service.upsert_relationship(&relationship).await {
        Ok(_) => {
            tracing::debug!(relationship_id = %relationship.id, "Relationship created");
            console.line("Relationship created successfully!");
            true
        }
        Err(e) => {
            tracing::warn!(relationship_id = %relationship.id, error = %e, "Relationship creation failed");
            console.failure("Create relationship", &e);
            false
        }
    }
}

/// Print every outgoing relationship of `source_id` as
/// `{source}:{name}->{target}`. Returns how many were printed before the
/// listing ended or failed.
pub async fn list_relationships<S, W>(service: &S, console: &mut Console<W>, source_id: &str) -> usize
where
    S: TwinService + ?Sized,
    W: Write,
{
    let mut listed = 0;
    let mut relationships = service.list_relationships(source_id);
    while let Some(item) = relationships.next().await {
        match item {
            Ok(r) => {
                console.line(format_args!("{}:{}->{}", r.source_id, r.name, r.target_id));
                listed += 1;
            }
            Err(e) => {
                tracing::warn!(source_id, error = %e, "Listing relationships failed");
                console.failure("List relationship", &e);
                break;
            }
        }
    }
    listed
}
