//! HTTP API client for the registry import server

use crate::api::{endpoints, types::*};
use crate::error::{CliError, Result};
use futures::StreamExt;
use indicatif::ProgressBar;
use registry_common::types::SubscriptionScope;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Body, Client, Response};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

// ============================================================================
// API Client Constants
// ============================================================================

/// Default connect timeout in seconds.
/// Can be overridden via REGISTRY_CONNECT_TIMEOUT_SECS environment variable.
/// Requests themselves have no deadline: uploads and status streams are long lived.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default server URL when not specified via environment variable.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// API client for the registry import server
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let connect_secs = std::env::var("REGISTRY_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    /// Create from `REGISTRY_SERVER_URL` and `REGISTRY_TOKEN`
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("REGISTRY_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        Self::new(base_url, std::env::var("REGISTRY_TOKEN").ok())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check server health
    pub async fn health_check(&self) -> Result<bool> {
        let url = endpoints::health_url(&self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Stream `path` into the job identified by `slug`
    ///
    /// The slug field is sent before the file part; `progress` advances as
    /// bytes leave the file.
    pub async fn upload(
        &self,
        slug: &str,
        path: &Path,
        progress: &ProgressBar,
    ) -> Result<UploadOutcome> {
        let token = self.token.as_deref().ok_or(CliError::MissingToken)?;

        let file = tokio::fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CliError::FileNotFound(path.display().to_string())
            } else {
                CliError::Io(e)
            }
        })?;
        let size = file.metadata().await?.len();
        progress.set_length(size);

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let bar = progress.clone();
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                bar.inc(bytes.len() as u64);
            }
        });
        let part = Part::stream_with_length(Body::wrap_stream(stream), size)
            .file_name(file_name.clone())
            .mime_str(content_type_for(path))?;
        let form = Form::new()
            .text("jobSlug", slug.to_string())
            .part("file", part);

        info!(slug, file = %file_name, bytes = size, "Uploading file");
        let response = self
            .client
            .post(endpoints::upload_url(&self.base_url))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        read_data(response).await
    }

    /// Open the status stream; the response body is the event stream
    pub async fn open_status_stream(
        &self,
        ids: &[i64],
        scope: SubscriptionScope,
    ) -> Result<Response> {
        let url = endpoints::status_stream_url(&self.base_url, ids, scope);
        debug!(url = %url, "Opening status stream");

        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        Ok(response)
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xml") => "application/xml",
        _ => "text/csv",
    }
}

async fn read_data<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    let envelope: ApiResponse<T> = response.json().await?;
    Ok(envelope.data)
}

async fn error_from(response: Response) -> CliError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
        Err(_) if body.is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => body,
    };
    CliError::api(status.as_u16(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("units.csv")), "text/csv");
        assert_eq!(content_type_for(Path::new("units.XML")), "application/xml");
        assert_eq!(content_type_for(Path::new("units")), "text/csv");
    }
}
