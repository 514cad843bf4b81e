//! Remote metadata endpoint client
//!
//! The endpoint takes POST bodies and answers with a JSON status envelope:
//! `{"status":"ok","data":...}` or `{"status":"error","message":"..."}`.
//!
//! - `fetch` sends `{"action":"get","identifier":...}` as JSON and goes
//!   through the shared TTL cache, so concurrent lookups of one track share a
//!   single request.
//! - `save` sends a form-encoded body with `action=save` and invalidates the
//!   cached lookup for that identifier. Saves are idempotent by identifier.

use crate::error::MetadataError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stagehand_common::cache::{request_key, RequestCache};
use stagehand_common::config::MetadataConfig;
use stagehand_common::params::EngineParams;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("stagehand-rc/", env!("CARGO_PKG_VERSION"));

/// Custom fields stored for one track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackMetadata {
    pub identifier: String,
    pub key: Option<String>,
    pub scale: Option<String>,
    /// Tempo in BPM
    pub tempo: Option<u32>,
    pub producers: Vec<String>,
    pub tags: Vec<String>,
    pub license_type: Option<String>,
    pub sample_safe: bool,
}

impl TrackMetadata {
    /// Form fields for a save request
    pub fn to_form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("action", "save".to_string()),
            ("identifier", self.identifier.clone()),
            ("key", self.key.clone().unwrap_or_default()),
            ("scale", self.scale.clone().unwrap_or_default()),
            ("tempo", self.tempo.map(|t| t.to_string()).unwrap_or_default()),
            ("producers", self.producers.join(",")),
            ("tags", self.tags.join(",")),
            ("license_type", self.license_type.clone().unwrap_or_default()),
            ("sample_safe", if self.sample_safe { "1" } else { "0" }.to_string()),
        ]
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Envelope<T> {
    Ok {
        #[serde(default = "Option::default")]
        data: Option<T>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

#[derive(Serialize)]
struct GetRequest<'a> {
    action: &'static str,
    identifier: &'a str,
}

fn get_body(identifier: &str) -> Vec<u8> {
    // Serializing two string fields cannot fail
    serde_json::to_vec(&GetRequest {
        action: "get",
        identifier,
    })
    .unwrap_or_default()
}

/// Client for the metadata endpoint
pub struct MetadataClient {
    http: reqwest::Client,
    endpoint: String,
    cache: RequestCache<Option<TrackMetadata>, MetadataError>,
}

impl MetadataClient {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        cache_duration: Duration,
    ) -> Result<Self, MetadataError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            cache: RequestCache::new(cache_duration),
        })
    }

    pub fn from_config(config: &MetadataConfig, params: &EngineParams) -> Result<Self, MetadataError> {
        Self::new(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
            params.cache_duration(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cache(&self) -> &RequestCache<Option<TrackMetadata>, MetadataError> {
        &self.cache
    }

    /// Cache key of the lookup request for `identifier`
    pub fn cache_key(&self, identifier: &str) -> String {
        request_key("POST", &self.endpoint, &get_body(identifier))
    }

    /// Look up saved metadata; `Ok(None)` when the endpoint has none
    pub async fn fetch(&self, identifier: &str) -> Result<Option<TrackMetadata>, MetadataError> {
        let body = get_body(identifier);
        let key = request_key("POST", &self.endpoint, &body);
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let identifier = identifier.to_string();

        self.cache
            .request(&key, move || async move {
                debug!(identifier = %identifier, "Fetching track metadata");
                let response = http
                    .post(&endpoint)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| MetadataError::Network(e.to_string()))?;
                read_envelope::<TrackMetadata>(response).await
            })
            .await
    }

    /// Save metadata for `record.identifier`
    pub async fn save(&self, record: &TrackMetadata) -> Result<(), MetadataError> {
        debug!(identifier = %record.identifier, "Saving track metadata");
        let response = self
            .http
            .post(&self.endpoint)
            .form(&record.to_form())
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;
        read_envelope::<serde_json::Value>(response).await?;

        self.cache.clear(&self.cache_key(&record.identifier));
        Ok(())
    }
}

async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, MetadataError> {
    let status = response.status();
    if !status.is_success() {
        return Err(MetadataError::Status(status.as_u16()));
    }

    let text = response
        .text()
        .await
        .map_err(|e| MetadataError::Network(e.to_string()))?;
    let envelope: Envelope<T> =
        serde_json::from_str(&text).map_err(|e| MetadataError::Parse(e.to_string()))?;

    match envelope {
        Envelope::Ok { data } => Ok(data),
        Envelope::Error { message } => Err(MetadataError::Endpoint(message)),
    }
}
