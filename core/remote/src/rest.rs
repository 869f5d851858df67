//! REST document API client.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use async_trait::async_trait;

use crate::store::{RemoteDocument, RemoteStore};
use tillsync_common::{DocKey, Error, Result};

/// Response from listing a collection.
#[derive(Debug, Deserialize)]
struct ListResponse {
    documents: Vec<ListedDocument>,
}

/// One entry in a collection listing: the id plus the document fields.
#[derive(Debug, Deserialize)]
struct ListedDocument {
    id: String,
    #[serde(flatten)]
    document: RemoteDocument,
}

/// Remote store backed by a JSON document API.
///
/// Documents live at `{base}/{collection}/{id}`; a collection listing at
/// `{base}/{collection}`; `HEAD {base}` answers reachability probes.
pub struct RestStore {
    http: Client,
    base: String,
}

impl RestStore {
    /// Create a new client for the given API base URL.
    ///
    /// # Errors
    /// - Returns error if the URL does not parse or the HTTP client
    ///   cannot be built
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL: {}", e)))?;

        let http = Client::builder()
            .user_agent("tillsync/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn doc_url(&self, key: &DocKey) -> String {
        format!("{}/{}/{}", self.base, key.collection(), key.id())
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base, collection)
    }

    /// Map a transport-level failure onto the error taxonomy.
    fn transport_error(context: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(format!("{}: {}", context, e))
        } else {
            Error::Network(format!("{}: {}", context, e))
        }
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }
}

/// Map an unsuccessful HTTP status onto the error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound("Document not found".to_string()),
        StatusCode::CONFLICT => Error::Conflict(format!("Remote rejected write: {}", body)),
        StatusCode::BAD_REQUEST => Error::InvalidInput(format!("Remote rejected request: {}", body)),
        StatusCode::REQUEST_TIMEOUT => Error::Timeout(format!("API timeout: {}", body)),
        s if s.is_server_error() => Error::Remote(format!("API error: {} - {}", s, body)),
        s => Error::Remote(format!("Unexpected API status: {} - {}", s, body)),
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    fn name(&self) -> &str {
        "rest"
    }

    async fn get(&self, key: &DocKey) -> Result<Option<RemoteDocument>> {
        let response = self
            .http
            .get(self.doc_url(key))
            .send()
            .await
            .map_err(|e| Self::transport_error("Failed to get document", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        self.handle_response(response).await.map(Some)
    }

    async fn set(&self, key: &DocKey, data: Value) -> Result<RemoteDocument> {
        let response = self
            .http
            .put(self.doc_url(key))
            .json(&data)
            .send()
            .await
            .map_err(|e| Self::transport_error("Failed to put document", e))?;

        self.handle_response(response).await
    }

    async fn update(&self, key: &DocKey, patch: Value) -> Result<RemoteDocument> {
        let response = self
            .http
            .patch(self.doc_url(key))
            .json(&patch)
            .send()
            .await
            .map_err(|e| Self::transport_error("Failed to patch document", e))?;

        self.handle_response(response).await
    }

    async fn delete(&self, key: &DocKey) -> Result<()> {
        let response = self
            .http
            .delete(self.doc_url(key))
            .send()
            .await
            .map_err(|e| Self::transport_error("Failed to delete document", e))?;

        let status = response.status();
        // Deleting an absent document is a success for the caller.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<(DocKey, RemoteDocument)>> {
        let response = self
            .http
            .get(self.collection_url(collection))
            .send()
            .await
            .map_err(|e| Self::transport_error("Failed to list collection", e))?;

        let listing: ListResponse = self.handle_response(response).await?;

        let mut results = Vec::with_capacity(listing.documents.len());
        for entry in listing.documents {
            let key = DocKey::new(collection, entry.id)?;
            results.push((key, entry.document));
        }
        Ok(results)
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .head(&self.base)
            .send()
            .await
            .map_err(|e| Self::transport_error("Reachability probe failed", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Remote(format!(
                "Reachability probe answered {}",
                response.status()
            )))
        }
    }
}
