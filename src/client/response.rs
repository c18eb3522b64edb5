//! HTTP response wrapper.

use std::collections::HashMap;

use reqwest::{Response, StatusCode};

use super::ApiError;

/// HTTP response wrapper.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub(crate) url: String,
    pub(crate) response: Response,
}

impl HttpResponse {
    pub(crate) fn new(response: Response) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        Self {
            status: response.status(),
            url: response.url().to_string(),
            headers,
            response,
        }
    }

    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the Content-Length header.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|s| s.parse().ok())
    }

    /// Turn a non-2xx response into an error.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::Status {
                status: self.status.as_u16(),
                url: self.url,
            })
        }
    }

    /// Read the body chunk by chunk into memory.
    pub async fn bytes(self) -> Result<Vec<u8>, ApiError> {
        let capacity = self.content_length().unwrap_or(0).min(64 * 1024 * 1024) as usize;
        let mut body = Vec::with_capacity(capacity);
        let mut response = self.response;
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Get response body as text.
    pub async fn text(self) -> Result<String, ApiError> {
        Ok(self.response.text().await?)
    }

    /// Parse the body as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, ApiError> {
        let url = self.url.clone();
        let text = self.text().await?;
        serde_json::from_str(&text).map_err(|source| ApiError::Decode { url, source })
    }
}
