use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::{FetchConfig, ServerConfig};
use crate::credentials::Credentials;
use crate::error::{OverlayError, Result};
use crate::recovery::{self, RetryPolicy};

/// Item kind as reported by the remote endpoint. Unknown kinds map to
/// `Other` so a new server-side type never breaks deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Episode,
    Movie,
    #[default]
    #[serde(other)]
    Other,
}

/// Metadata record for a single item, deserialized from the PascalCase
/// JSON of the remote endpoint. Transient: fetched per distinct item id
/// and never persisted across sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemMetadata {
    #[serde(rename = "Type")]
    pub kind: ItemKind,

    #[serde(rename = "Name")]
    pub name: Option<String>,

    #[serde(rename = "SeriesName")]
    pub series_name: Option<String>,

    #[serde(rename = "SeasonName")]
    pub season_name: Option<String>,

    #[serde(rename = "IndexNumber")]
    pub index_number: Option<u32>,

    #[serde(rename = "Overview")]
    pub overview: Option<String>,

    #[serde(rename = "OfficialRating")]
    pub official_rating: Option<String>,

    #[serde(rename = "RunTimeTicks")]
    pub run_time_ticks: Option<u64>,

    #[serde(rename = "ProductionYear")]
    pub production_year: Option<u32>,
}

/// Stateless per-call client for the remote `/Items/{id}` endpoint.
///
/// Retries transient failures internally through the shared recovery
/// policy; superseded-fetch discard is the caller's responsibility.
#[derive(Clone)]
pub struct MetadataClient {
    client: Client,
    base_url: Url,
    auth_header: String,
    retry: RetryPolicy,
    id_shape: Regex,
}

impl MetadataClient {
    pub fn new(server: &ServerConfig, fetch: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(fetch.request_timeout_seconds))
            .build()?;

        let base_url = Url::parse(&server.base_url)?;

        // Item ids are opaque but must stay inside one path segment;
        // anything else is rejected before a network round trip.
        let id_shape = Regex::new(r"^[0-9a-fA-F-]{1,64}$").expect("static id pattern");

        Ok(Self {
            client,
            base_url,
            auth_header: server.auth_header.clone(),
            retry: fetch.policy(),
            id_shape,
        })
    }

    /// Fetch the metadata record for `id`, attaching the credential
    /// token as the auth header.
    ///
    /// Any non-2xx response or transport failure is retried up to the
    /// configured bound; the final attempt's failure is surfaced as
    /// `FetchFailed` carrying the last status.
    pub async fn fetch_item(&self, id: &str, credentials: &Credentials) -> Result<ItemMetadata> {
        if !self.id_shape.is_match(id) {
            return Err(OverlayError::InvalidItemId(id.to_string()));
        }

        let url = self.base_url.join(&format!("Items/{}", id))?;
        debug!("Fetching item metadata from {}", url);

        recovery::retry(&self.retry, |attempt| {
            let url = url.clone();
            async move {
                let response = self
                    .client
                    .get(url)
                    .header(self.auth_header.as_str(), credentials.token.as_str())
                    .send()
                    .await
                    .map_err(|e| OverlayError::FetchFailed {
                        attempts: attempt,
                        status: None,
                        message: e.to_string(),
                    })?;

                let status = response.status();
                if !status.is_success() {
                    // Drain the body so the connection can be reused
                    let _ = response.bytes().await;
                    return Err(OverlayError::FetchFailed {
                        attempts: attempt,
                        status: Some(status.as_u16()),
                        message: format!("HTTP {}", status.as_u16()),
                    });
                }

                response
                    .json::<ItemMetadata>()
                    .await
                    .map_err(|e| OverlayError::FetchFailed {
                        attempts: attempt,
                        status: Some(status.as_u16()),
                        message: format!("malformed item record: {}", e),
                    })
            }
        })
        .await
        .map_err(|e| {
            warn!("Item {} fetch exhausted retries: {}", id, e);
            e
        })
    }
}
