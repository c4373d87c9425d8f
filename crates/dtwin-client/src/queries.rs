//! Read operations: model lookup, paged listings, and twin queries.
//!
//! Listings are returned as lazy streams. No request is issued until the
//! stream is polled, and each page is fetched only when the previous one has
//! been consumed.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use dtwin_core::{ModelData, Relationship};

use crate::client::{DigitalTwinsClient, TwinsError};

/// One page of a `nextLink`-paged listing.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

/// One page of query results.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(default)]
    continuation_token: Option<String>,
}

/// Where a `nextLink` listing goes after the current page.
enum Cursor {
    Fetch(Url),
    Fail(TwinsError),
    Done,
}

/// Query request body: the query text first, then only the continuation token.
#[derive(Debug)]
enum QueryRequest {
    Query(String),
    ContinuationToken(String),
}

impl QueryRequest {
    fn body(&self) -> Value {
        match self {
            QueryRequest::Query(q) => serde_json::json!({ "query": q }),
            QueryRequest::ContinuationToken(t) => serde_json::json!({ "continuationToken": t }),
        }
    }
}

impl DigitalTwinsClient {
    // ── Models ───────────────────────────────────────────────────

    /// Get a registered model by id. A missing model is a 404 [`TwinsError::Service`].
    pub async fn get_model(&self, model_id: &str) -> Result<ModelData, TwinsError> {
        let url = self.url(&["models", model_id])?;
        self.send_json(self.http.get(url)).await
    }

    /// Stream every registered model.
    pub fn list_models(&self) -> BoxStream<'_, Result<ModelData, TwinsError>> {
        match self.url(&["models"]) {
            Ok(url) => self.follow_next_links(url),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    // ── Relationships ────────────────────────────────────────────

    /// Stream the outgoing relationships of a twin.
    pub fn list_relationships(
        &self,
        source_id: &str,
    ) -> BoxStream<'_, Result<Relationship, TwinsError>> {
        match self.url(&["digitaltwins", source_id, "relationships"]) {
            Ok(url) => self.follow_next_links(url),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Run a query and stream its results, following continuation tokens.
    pub fn query(&self, query: &str) -> BoxStream<'_, Result<Value, TwinsError>> {
        let first = QueryRequest::Query(query.to_string());
        stream::try_unfold(Some(first), move |request| async move {
            let Some(request) = request else {
                return Ok::<_, TwinsError>(None);
            };
            let url = self.url(&["query"])?;
            let page: QueryPage = self
                .send_json(self.http.post(url).json(&request.body()))
                .await?;
            tracing::debug!(
                results = page.value.len(),
                more = page.continuation_token.is_some(),
                "Fetched query page"
            );
            let next = page.continuation_token.map(QueryRequest::ContinuationToken);
            Ok(Some((
                stream::iter(page.value.into_iter().map(Ok::<_, TwinsError>)),
                next,
            )))
        })
        .try_flatten()
        .boxed()
    }

    // ── Paging ───────────────────────────────────────────────────

    /// Fetch `first`, then every `nextLink` it leads to. A bad link ends the
    /// stream with an error after the items of the page that carried it.
    fn follow_next_links<'a, T>(&'a self, first: Url) -> BoxStream<'a, Result<T, TwinsError>>
    where
        T: DeserializeOwned + Send + 'a,
    {
        stream::try_unfold(Cursor::Fetch(first), move |cursor| async move {
            let url = match cursor {
                Cursor::Fetch(url) => url,
                Cursor::Fail(e) => return Err(e),
                Cursor::Done => return Ok(None),
            };
            let page: Page<T> = self.send_json(self.http.get(url)).await?;
            let next = match page.next_link.as_deref() {
                Some(link) => match self.same_origin_link(link) {
                    Ok(url) => Cursor::Fetch(url),
                    Err(e) => Cursor::Fail(e),
                },
                None => Cursor::Done,
            };
            tracing::debug!(
                items = page.value.len(),
                more = matches!(next, Cursor::Fetch(_)),
                "Fetched page"
            );
            Ok(Some((
                stream::iter(page.value.into_iter().map(Ok::<_, TwinsError>)),
                next,
            )))
        })
        .try_flatten()
        .boxed()
    }

    /// Parse a `nextLink`, refusing any link that would send the bearer
    /// token to another origin.
    fn same_origin_link(&self, link: &str) -> Result<Url, TwinsError> {
        let url = Url::parse(link)?;
        if url.origin() != self.endpoint().origin() {
            tracing::warn!(link, endpoint = %self.endpoint(), "Refusing foreign paging link");
            return Err(TwinsError::ForeignLink(link.to_string()));
        }
        Ok(url)
    }
}
