//! Jamendo catalog client.
//!
//! Talks to the public Jamendo v3.0 API. Every request carries the client id
//! and asks for the `jsonpretty` format; responses are envelopes of the form
//! `{"headers": {...}, "results": [...]}`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::CatalogSource;
use crate::config::JamplayConfig;
use crate::converters;
use crate::error::{JamplayError, Result};
use crate::models::{Playlist, Track};

/// Response format requested from the catalog.
const RESPONSE_FORMAT: &str = "jsonpretty";

/// Jamendo catalog client.
///
/// # Example
///
/// ```rust,no_run
/// use jamplay::{CatalogSource, JamendoApi, JamplayConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let api = JamendoApi::new(&JamplayConfig::new("your_client_id"))?;
///     let tracks = api.fetch_tracks(20, 0).await?;
///     println!("Fetched {} tracks", tracks.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JamendoApi {
    client: Client,
    base_url: String,
    client_id: String,
}

impl JamendoApi {
    /// Create a new catalog client from config.
    pub fn new(config: &JamplayConfig) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(JamplayError::MissingClientId);
        }

        let client = Client::builder()
            .user_agent(concat!("jamplay/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base.clone(),
            client_id: config.client_id.clone(),
        })
    }

    /// Make a GET request with query parameters and unwrap the envelope.
    async fn get_api_with_params(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("GET {} with params: {:?}", url, params);

        let response = self
            .client
            .get(&url)
            .query(&[("client_id", self.client_id.as_str()), ("format", RESPONSE_FORMAT)])
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        let data: Value = response.json().await?;

        check_envelope(&data)?;
        Ok(data)
    }
}

#[async_trait]
impl CatalogSource for JamendoApi {
    async fn fetch_tracks(&self, limit: u32, offset: u32) -> Result<Vec<Track>> {
        let response = self
            .get_api_with_params(
                "tracks/",
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await?;

        let tracks: Vec<Track> = converters::results(&response)
            .iter()
            .filter_map(|t| match converters::parse_track(t) {
                Ok(track) => Some(track),
                Err(e) => {
                    warn!("Skipping track record: {}", e);
                    None
                }
            })
            .collect();

        debug!("Fetched {} tracks (limit {}, offset {})", tracks.len(), limit, offset);
        Ok(tracks)
    }

    async fn fetch_featured_playlists(&self, limit: u32) -> Result<Vec<Playlist>> {
        let response = self
            .get_api_with_params(
                "playlists/",
                &[("featured", "true".to_string()), ("limit", limit.to_string())],
            )
            .await?;

        Ok(converters::results(&response)
            .iter()
            .filter_map(|p| converters::parse_playlist(p).ok())
            .collect())
    }
}

/// Fail on envelopes whose `headers.status` is `failed`.
fn check_envelope(data: &Value) -> Result<()> {
    let Some(headers) = data.get("headers") else {
        return Ok(());
    };

    if headers.get("status").and_then(|s| s.as_str()) == Some("failed") {
        let code = headers.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        let message = headers
            .get("error_message")
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or("Unknown error")
            .to_string();
        error!("Jamendo API error {}: {}", code, message);
        return Err(JamplayError::CatalogStatus { code, message });
    }

    Ok(())
}
