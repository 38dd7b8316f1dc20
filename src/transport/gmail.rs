//! Gmail REST v1 implementation of [`MessageApi`]

use super::MessageApi;
use super::batch;
use crate::auth::TokenProvider;
use crate::config::ApiConfig;
use crate::error::{AuthError, Error, Result};
use crate::types::{FetchFailure, FetchOutcome, MessageId, Page, Record};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

const UNAUTHORIZED: u16 = 401;

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Gmail API client
///
/// Every call carries the provider's current bearer token. A 401 answer triggers
/// one forced renewal and a single replay of the same request. Inside a batch,
/// parts answered with 401 are resent once after renewal.
pub struct GmailClient {
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    base_url: Url,
    user_id: String,
    label_ids: Vec<String>,
}

impl GmailClient {
    /// Create a client with its own HTTP connection pool
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be created
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("gmail-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Self::with_http_client(config, tokens, http_client)
    }

    /// Create a client sharing an existing HTTP connection pool
    pub fn with_http_client(
        config: &ApiConfig,
        tokens: Arc<dyn TokenProvider>,
        http_client: reqwest::Client,
    ) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::config("api.base_url", format!("invalid URL: {}", e)))?;
        Ok(Self {
            http_client,
            tokens,
            base_url,
            user_id: config.user_id.clone(),
            label_ids: config.label_ids.clone(),
        })
    }

    /// Build `{base}/{segments...}` with each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config("api.base_url", "URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn message_url(&self, id: &MessageId) -> Result<Url> {
        self.endpoint(&["gmail", "v1", "users", &self.user_id, "messages", id.as_str()])
    }

    /// Send a request built by `build`, renewing the token once on 401
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let token = self.tokens.access_token().await?;
        let response = build(&token).send().await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!("access token rejected, renewing");
        let token = self.tokens.refresh().await?;
        let response = build(&token).send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::Rejected.into());
        }
        Ok(response)
    }

    /// One batch round trip; each decoded part is paired with the id it answers
    async fn send_batch(&self, ids: &[MessageId]) -> Result<Vec<(MessageId, batch::BatchPart)>> {
        let paths = ids
            .iter()
            .map(|id| self.message_url(id).map(|url| url.path().to_string()))
            .collect::<Result<Vec<_>>>()?;
        let boundary = batch::new_boundary();
        let body = batch::encode_request(&boundary, &paths);
        let url = self.endpoint(&["batch", "gmail", "v1"])?;
        let content_type = format!("multipart/mixed; boundary={}", boundary);

        let response = self
            .send_authorized(|token| {
                self.http_client
                    .post(url.clone())
                    .bearer_auth(token)
                    .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                    .body(body.clone())
            })
            .await?;
        let response = check_status(response).await?;

        let reply_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let reply_boundary = batch::boundary_from_content_type(&reply_type)?;
        let text = response.text().await?;
        let parts = batch::decode_response(&reply_boundary, &text)?;

        let mut answered = Vec::with_capacity(parts.len());
        for (position, part) in parts.into_iter().enumerate() {
            let index = part.index.unwrap_or(position);
            match ids.get(index) {
                Some(id) => answered.push((id.clone(), part)),
                None => {
                    tracing::warn!(index, "batch reply references an unknown request, ignoring");
                }
            }
        }
        Ok(answered)
    }
}

/// Turn a non-success response into [`Error::Api`]
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Pull `error.message` out of a Google error envelope, falling back to the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|doc| {
            doc.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn outcome_for(id: MessageId, part: batch::BatchPart) -> FetchOutcome {
    if !(200..300).contains(&part.status) {
        return FetchOutcome::Failure(FetchFailure {
            id,
            status: Some(part.status),
            message: error_message(&part.body),
        });
    }
    match serde_json::from_str::<Record>(&part.body) {
        Ok(record) => FetchOutcome::Record(record),
        Err(e) => FetchOutcome::Failure(FetchFailure {
            id,
            status: Some(part.status),
            message: format!("unparseable record: {}", e),
        }),
    }
}

#[async_trait]
impl MessageApi for GmailClient {
    async fn list_messages(&self, cursor: Option<&str>, max_results: usize) -> Result<Page> {
        let url = self.endpoint(&["gmail", "v1", "users", &self.user_id, "messages"])?;

        let mut query: Vec<(&str, String)> = vec![("maxResults", max_results.to_string())];
        if let Some(cursor) = cursor {
            query.push(("pageToken", cursor.to_string()));
        }
        for label in &self.label_ids {
            query.push(("labelIds", label.clone()));
        }

        let response = self
            .send_authorized(|token| {
                self.http_client
                    .get(url.clone())
                    .bearer_auth(token)
                    .query(&query)
            })
            .await?;
        let listing: ListResponse = check_status(response).await?.json().await?;

        tracing::debug!(
            count = listing.messages.len(),
            has_next = listing.next_page_token.is_some(),
            "listed messages"
        );

        Ok(Page {
            ids: listing
                .messages
                .into_iter()
                .map(|m| MessageId(m.id))
                .collect(),
            next_cursor: listing.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn check_credentials(&self) -> Result<()> {
        self.tokens.access_token().await.map(|_| ())
    }

    async fn batch_get(&self, ids: &[MessageId]) -> Result<Vec<FetchOutcome>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        let mut expired = Vec::new();
        for (id, part) in self.send_batch(ids).await? {
            if part.status == UNAUTHORIZED {
                expired.push(id);
            } else {
                outcomes.push(outcome_for(id, part));
            }
        }

        // The batch envelope can succeed while individual parts report an expired token
        if !expired.is_empty() {
            tracing::info!(parts = expired.len(), "access token rejected inside batch, renewing");
            self.tokens.refresh().await?;
            for (id, part) in self.send_batch(&expired).await? {
                if part.status == UNAUTHORIZED {
                    return Err(AuthError::Rejected.into());
                }
                outcomes.push(outcome_for(id, part));
            }
        }

        Ok(outcomes)
    }
}
