//! `spotify-api` fetch functions: thin wrappers around the public Spotify
//! Web API. Illustrative only — not a hardened client (token refresh, rate
//! limit backoff, and pagination edge cases are out of scope, §1
//! Non-goals). Grounded on `app/utils/spotify_api/client.py` and
//! `app/tasks/fetch_functions/data_sources/spotify_api.py`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{BatchFetch, ErrorKind, FetchError, Params, Result};
use crate::types::DataSource;

const TRACKS_MAX_BATCH_SIZE: usize = 50;
const TRACKS_ENDPOINT: &str = "https://api.spotify.com/v1/tracks";

#[derive(Deserialize)]
struct TracksParams {
    access_token: String,
}

pub struct TracksFetch {
    http: reqwest::Client,
    access_token: String,
}

impl TracksFetch {
    pub fn new(http: reqwest::Client, params: &Params) -> Result<Self> {
        let raw = params.clone().ok_or_else(|| invalid_params("missing params"))?;
        let parsed: TracksParams =
            serde_json::from_value(raw).map_err(|e| invalid_params(e.to_string()))?;
        Ok(TracksFetch {
            http,
            access_token: parsed.access_token,
        })
    }
}

fn invalid_params(message: impl Into<String>) -> super::Error {
    ErrorKind::InvalidParams {
        data_source: DataSource::SpotifyApi,
        task_type: "tracks".to_string(),
        message: message.into(),
    }
    .into()
}

#[async_trait]
impl BatchFetch for TracksFetch {
    async fn call(&self, inputs: &[Value]) -> std::result::Result<Option<Vec<Option<Value>>>, FetchError> {
        let ids: Vec<String> = inputs
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect();

        let response = self
            .http
            .get(TRACKS_ENDPOINT)
            .bearer_auth(&self.access_token)
            .query(&[("ids", ids.join(","))])
            .send()
            .await
            .map_err(|e| FetchError::fatal(format!("request to Spotify API failed: {e}")))?;

        match response.status().as_u16() {
            401 | 403 => Err(FetchError::fatal(format!(
                "Spotify API rejected credentials (status {})",
                response.status()
            ))),
            429 => Err(FetchError::fatal("Spotify API rate limit exceeded")),
            200 => {
                let body: TracksResponse = response
                    .json()
                    .await
                    .map_err(|e| FetchError::fatal(format!("malformed Spotify API response: {e}")))?;
                let outputs = body
                    .tracks
                    .into_iter()
                    .map(|t| t.map(|track| serde_json::to_value(track).unwrap()))
                    .collect();
                Ok(Some(outputs))
            }
            status => Err(FetchError::non_fatal(format!(
                "Spotify API returned unexpected status {status}"
            ))),
        }
    }

    fn max_batch_size(&self) -> usize {
        TRACKS_MAX_BATCH_SIZE
    }
}

#[derive(Deserialize)]
struct TracksResponse {
    tracks: Vec<Option<Track>>,
}

#[derive(Deserialize, serde::Serialize)]
struct Track {
    id: String,
    name: String,
    duration_ms: u64,
    popularity: u32,
}
