//! HTTP client for the relay's report store routes.
//!
//! `StoreApi` is the seam reconcilers call through; `HttpStore` is the
//! production implementation. Tests substitute an in-process fake.

use async_trait::async_trait;
use events::{CommentView, ReportStatus, VoteView};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClientError;

#[async_trait]
pub trait StoreApi: Send + Sync {
    async fn list_comments(&self, report_id: &str) -> Result<Vec<CommentView>, ClientError>;

    async fn create_comment(&self, report_id: &str, body: &str) -> Result<CommentView, ClientError>;

    /// Returns the number of comments removed.
    async fn clear_comments(&self, report_id: &str) -> Result<u64, ClientError>;

    async fn vote_status(&self, report_id: &str) -> Result<VoteView, ClientError>;

    async fn toggle_vote(&self, report_id: &str) -> Result<VoteView, ClientError>;

    async fn report_status(&self, report_id: &str) -> Result<ReportStatus, ClientError>;

    async fn update_status(&self, report_id: &str, status: ReportStatus) -> Result<ReportStatus, ClientError>;
}

#[derive(Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct StatusBody {
    status: ReportStatus,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: ReportStatus,
}

#[derive(Deserialize)]
struct ClearedResponse {
    cleared: u64,
}

#[derive(Deserialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

/// Map a non-success response body onto [`ClientError::Rejected`].
///
/// Bodies that are not the relay's `{code, message}` shape keep the raw text.
pub(crate) fn rejection(status: u16, text: &str) -> ClientError {
    match serde_json::from_str::<ErrorResponse>(text) {
        Ok(body) => ClientError::Rejected { status, code: body.code, message: body.message },
        Err(_) => ClientError::Rejected { status, code: "E_HTTP".to_owned(), message: text.trim().to_owned() },
    }
}

/// Build `{base}/api/{segments...}` with each segment percent-encoded.
pub(crate) fn api_url(base_url: &str, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = Url::parse(base_url).map_err(|_| ClientError::InvalidBaseUrl(base_url.to_owned()))?;
    url.path_segments_mut()
        .map_err(|()| ClientError::InvalidBaseUrl(base_url.to_owned()))?
        .pop_if_empty()
        .push("api")
        .extend(segments);
    Ok(url)
}

/// Read a JSON body, or turn a non-2xx response into a rejection.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(rejection(status.as_u16(), &text));
    }
    Ok(response.json().await?)
}

pub struct HttpStore {
    http: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl HttpStore {
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] if `base_url` is not an
    /// absolute http(s) URL.
    pub fn new(base_url: &str, session_token: Option<String>) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        let parsed = Url::parse(&base_url).map_err(|_| ClientError::InvalidBaseUrl(base_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl(base_url));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            session_token: session_token.filter(|token| !token.trim().is_empty()),
        })
    }

    fn request(&self, method: Method, report_id: &str, resource: &str) -> Result<RequestBuilder, ClientError> {
        let url = api_url(&self.base_url, &["reports", report_id, resource])?;
        debug!(%method, %url, "store: request");
        let builder = self.http.request(method, url);
        Ok(match &self.session_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }
}

#[async_trait]
impl StoreApi for HttpStore {
    async fn list_comments(&self, report_id: &str) -> Result<Vec<CommentView>, ClientError> {
        let response = self.request(Method::GET, report_id, "comments")?.send().await?;
        read_json(response).await
    }

    async fn create_comment(&self, report_id: &str, body: &str) -> Result<CommentView, ClientError> {
        let response = self
            .request(Method::POST, report_id, "comments")?
            .json(&CommentBody { body })
            .send()
            .await?;
        read_json(response).await
    }

    async fn clear_comments(&self, report_id: &str) -> Result<u64, ClientError> {
        let response = self.request(Method::DELETE, report_id, "comments")?.send().await?;
        let cleared: ClearedResponse = read_json(response).await?;
        Ok(cleared.cleared)
    }

    async fn vote_status(&self, report_id: &str) -> Result<VoteView, ClientError> {
        let response = self.request(Method::GET, report_id, "vote")?.send().await?;
        read_json(response).await
    }

    async fn toggle_vote(&self, report_id: &str) -> Result<VoteView, ClientError> {
        let response = self.request(Method::POST, report_id, "vote")?.send().await?;
        read_json(response).await
    }

    async fn report_status(&self, report_id: &str) -> Result<ReportStatus, ClientError> {
        let response = self.request(Method::GET, report_id, "status")?.send().await?;
        let body: StatusResponse = read_json(response).await?;
        Ok(body.status)
    }

    async fn update_status(&self, report_id: &str, status: ReportStatus) -> Result<ReportStatus, ClientError> {
        let response = self
            .request(Method::PUT, report_id, "status")?
            .json(&StatusBody { status })
            .send()
            .await?;
        let body: StatusResponse = read_json(response).await?;
        Ok(body.status)
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
