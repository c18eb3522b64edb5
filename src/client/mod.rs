//! HTTP client for the imagery Graph API and its CDN.

mod error;
mod response;
pub mod retry;

pub use error::ApiError;
pub use response::HttpResponse;
pub use retry::RetryPolicy;

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::Settings;
use crate::models::{Detection, ImageRecord, ListedImage, Page};

pub const USER_AGENT: &str = concat!("seqacquire/", env!("CARGO_PKG_VERSION"));

/// API client. Graph requests carry the `OAuth` authorization header;
/// payload downloads from the CDN go out unauthenticated.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    api_url: String,
    access_token: String,
}

impl ApiClient {
    /// Create a client from resolved settings.
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        Self::with_base_url(
            &settings.api_url,
            &settings.access_token,
            Duration::from_secs(settings.request_timeout),
        )
    }

    /// Create a client against an explicit API base URL.
    pub fn with_base_url(
        api_url: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        Url::parse(api_url)?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// First page of a user's images, with the fields discovery needs.
    pub fn user_images_url(&self, username: &str, page_size: u32) -> Result<String, ApiError> {
        let url = Url::parse_with_params(
            &format!("{}/images", self.api_url),
            &[
                ("fields", ListedImage::FIELDS.join(",")),
                ("creator_username", username.to_string()),
                ("limit", page_size.to_string()),
            ],
        )?;
        Ok(url.into())
    }

    /// Image id listing for one sequence.
    pub fn sequence_images_url(&self, sequence_id: &str) -> Result<String, ApiError> {
        let url = Url::parse_with_params(
            &format!("{}/image_ids", self.api_url),
            &[("sequence_id", sequence_id)],
        )?;
        Ok(url.into())
    }

    /// Per-image metadata endpoint.
    pub fn image_url(&self, image_id: &str, fields: &[&str]) -> Result<String, ApiError> {
        let mut url = Url::parse(&format!("{}/", self.api_url))?.join(image_id)?;
        url.query_pairs_mut().append_pair("fields", &fields.join(","));
        Ok(url.into())
    }

    /// Object detections of one image.
    pub fn detections_url(&self, image_id: &str) -> Result<String, ApiError> {
        let mut url = Url::parse(&format!("{}/", self.api_url))?
            .join(&format!("{}/detections", image_id))?;
        url.query_pairs_mut()
            .append_pair("fields", &Detection::FIELDS.join(","));
        Ok(url.into())
    }

    /// Authenticated GET against the API. Non-2xx statuses are errors.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, ApiError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("OAuth {}", self.access_token))
            .send()
            .await?;
        HttpResponse::new(response).error_for_status()
    }

    /// Authenticated GET, body parsed as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.get(url).await?.json().await
    }

    /// Fetch one page of a cursor-paginated listing.
    pub async fn fetch_page<T: DeserializeOwned>(&self, url: &str) -> Result<Page<T>, ApiError> {
        self.get_json(url).await
    }

    /// Fetch full metadata for one image.
    pub async fn fetch_image(&self, image_id: &str) -> Result<ImageRecord, ApiError> {
        let url = self.image_url(image_id, ImageRecord::FIELDS)?;
        self.get_json(&url).await
    }

    /// Fetch the object detections of one image.
    pub async fn fetch_detections(&self, image_id: &str) -> Result<Vec<Detection>, ApiError> {
        let url = self.detections_url(image_id)?;
        let page: Page<Detection> = self.fetch_page(&url).await?;
        Ok(page.data)
    }

    /// Unauthenticated download of a binary payload (single attempt).
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.client.get(url).send().await?;
        HttpResponse::new(response).error_for_status()?.bytes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::with_base_url("https://graph.example.com/", "tok", Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_user_images_url() {
        let url = Url::parse(&client().user_images_url("walker", 100).unwrap()).unwrap();
        assert_eq!(url.path(), "/images");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&(
            "fields".to_string(),
            "id,sequence,creator,created_at,camera_type,captured_at".to_string()
        )));
        assert!(pairs.contains(&("creator_username".to_string(), "walker".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "100".to_string())));
    }

    #[test]
    fn test_sequence_images_url() {
        let url = client().sequence_images_url("abc").unwrap();
        assert_eq!(url, "https://graph.example.com/image_ids?sequence_id=abc");
    }

    #[test]
    fn test_image_url() {
        let url = Url::parse(&client().image_url("123", &["id", "geometry"]).unwrap()).unwrap();
        assert_eq!(url.path(), "/123");
        assert_eq!(
            url.query_pairs().next().map(|(k, v)| (k.into_owned(), v.into_owned())),
            Some(("fields".to_string(), "id,geometry".to_string()))
        );
    }

    #[test]
    fn test_detections_url() {
        let url = Url::parse(&client().detections_url("123").unwrap()).unwrap();
        assert_eq!(url.path(), "/123/detections");
        assert_eq!(url.query(), Some("fields=id%2Cvalue"));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ApiClient::with_base_url("not a url", "tok", Duration::from_secs(5)),
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
