//! `spotify-internal` fetch functions: calls against an unofficial,
//! undocumented internal endpoint. Illustrative only — grounded on
//! `app/tasks/fetch_functions/data_sources/spotify_internal.py`; treated
//! as more failure-prone than the public API, hence every non-2xx and
//! connection failure here is classified Fatal rather than per-item
//! non-fatal, mirroring the source's ban-sensitive handling.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ErrorKind, FetchError, Params, Result, SingleItemFetch};
use crate::types::DataSource;

const TRACK_CREDITS_ENDPOINT: &str = "https://spclient.wg.spotify.com/track-credits-view/v0/experimental/";

#[derive(Deserialize)]
struct TrackCreditsParams {
    access_token: String,
}

pub struct TrackCreditsFetch {
    http: reqwest::Client,
    access_token: String,
}

impl TrackCreditsFetch {
    pub fn new(http: reqwest::Client, params: &Params) -> Result<Self> {
        let raw = params.clone().ok_or_else(|| invalid_params("missing params"))?;
        let parsed: TrackCreditsParams =
            serde_json::from_value(raw).map_err(|e| invalid_params(e.to_string()))?;
        Ok(TrackCreditsFetch {
            http,
            access_token: parsed.access_token,
        })
    }
}

fn invalid_params(message: impl Into<String>) -> super::Error {
    ErrorKind::InvalidParams {
        data_source: DataSource::SpotifyInternal,
        task_type: "track-credits".to_string(),
        message: message.into(),
    }
    .into()
}

#[async_trait]
impl SingleItemFetch for TrackCreditsFetch {
    async fn call(&self, input: &Value) -> std::result::Result<Option<Value>, FetchError> {
        let track_id = input
            .as_str()
            .ok_or_else(|| FetchError::fatal("track-credits requires a string track id"))?;

        let url = format!("{TRACK_CREDITS_ENDPOINT}{track_id}/credits");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| FetchError::fatal(format!("request to Spotify internal API failed: {e}")))?;

        match response.status().as_u16() {
            404 => Ok(None),
            401 | 403 => Err(FetchError::fatal(format!(
                "Spotify internal API rejected credentials (status {})",
                response.status()
            ))),
            200 => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| FetchError::fatal(format!("malformed response: {e}")))?;
                Ok(Some(body))
            }
            status => Err(FetchError::fatal(format!(
                "Spotify internal API returned unexpected status {status}"
            ))),
        }
    }
}
