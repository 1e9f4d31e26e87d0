//! The Fetch Function Registry (§4.4): given `(data_source, task_type,
//! params)`, produces either a single-item or a batch fetch function.
//!
//! Grounded on the original system's `app/tasks/fetch_functions/__init__.py`
//! dispatch table and `data_sources/{dummy_api,spotify_api,spotify_internal}.py`;
//! the `SingleItem`/`Batch` tagged-sum shape is the redesign mandated by
//! §9 ("Polymorphism over data sources").

mod error;
pub mod dummy_api;
pub mod spotify_api;
pub mod spotify_internal;

pub use error::{Classification, Error, ErrorKind, FetchError, Result};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::DataSource;

/// A fetch function that processes one input at a time.
#[async_trait]
pub trait SingleItemFetch: Send + Sync {
    /// Returns `Ok(None)` for "no output", `Ok(Some(v))` for a successful
    /// output, or `Err(FetchError)` classified Fatal/NonFatal (§4.4, §7).
    async fn call(&self, input: &Value) -> std::result::Result<Option<Value>, FetchError>;
}

/// A fetch function that processes a bounded batch of inputs at once. The
/// returned vector, if `Some`, must have exactly as many entries as the
/// input slice; a mismatch is a Fatal error (§4.2, §8 scenario 4).
#[async_trait]
pub trait BatchFetch: Send + Sync {
    async fn call(&self, inputs: &[Value]) -> std::result::Result<Option<Vec<Option<Value>>>, FetchError>;

    /// The maximum number of inputs this fetch function accepts per call.
    /// Must be `>= 2` (§8 "Boundary behaviors").
    fn max_batch_size(&self) -> usize;
}

/// The tagged sum a registry lookup produces (§4.4, §9).
#[derive(Clone)]
pub enum FetchFunction {
    SingleItem(Arc<dyn SingleItemFetch>),
    Batch(Arc<dyn BatchFetch>),
}

/// Parameters supplied at task creation, opaque to everything except the
/// specific fetch function that parses them (§9 "Polymorphism over task
/// parameters").
pub type Params = Option<Value>;

/// Resolves `(data_source, task_type)` pairs to concrete fetch functions.
/// The registry never panics or fails for a *known* pair; unknown pairs
/// are a configuration error surfaced at `create_task` time.
pub struct Registry {
    http: reqwest::Client,
}

impl Registry {
    pub fn new(http: reqwest::Client) -> Self {
        Registry { http }
    }

    pub fn is_known(&self, data_source: DataSource, task_type: &str) -> bool {
        self.resolve(data_source, task_type, &None).is_ok()
    }

    pub fn resolve(
        &self,
        data_source: DataSource,
        task_type: &str,
        params: &Params,
    ) -> Result<FetchFunction> {
        match (data_source, task_type) {
            (DataSource::DummyApi, "echo") => Ok(FetchFunction::SingleItem(Arc::new(
                dummy_api::EchoFetch::from_params(params),
            ))),
            (DataSource::DummyApi, "flaky") => Ok(FetchFunction::SingleItem(Arc::new(
                dummy_api::FlakyFetch::from_params(params),
            ))),
            (DataSource::DummyApi, "throw-above-threshold") => Ok(FetchFunction::SingleItem(Arc::new(
                dummy_api::ThrowAboveThresholdFetch::from_params(params),
            ))),
            (DataSource::SpotifyApi, "tracks") => Ok(FetchFunction::Batch(Arc::new(
                spotify_api::TracksFetch::new(self.http.clone(), params)?,
            ))),
            (DataSource::SpotifyInternal, "track-credits") => Ok(FetchFunction::SingleItem(Arc::new(
                spotify_internal::TrackCreditsFetch::new(self.http.clone(), params)?,
            ))),
            (data_source, task_type) => Err(ErrorKind::UnknownTaskType {
                data_source,
                task_type: task_type.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(reqwest::Client::new())
    }

    #[test]
    fn known_pairs_resolve() {
        let registry = registry();
        assert!(registry.is_known(DataSource::DummyApi, "echo"));
        assert!(registry.is_known(DataSource::DummyApi, "flaky"));
        assert!(registry.is_known(DataSource::DummyApi, "throw-above-threshold"));
    }

    #[test]
    fn unknown_pair_is_rejected() {
        let registry = registry();
        assert!(!registry.is_known(DataSource::DummyApi, "does-not-exist"));
        let err = registry
            .resolve(DataSource::DummyApi, "does-not-exist", &None)
            .unwrap_err();
        assert!(matches!(err.0, ErrorKind::UnknownTaskType { .. }));
    }

    #[test]
    fn batch_fetch_advertises_its_max_batch_size() {
        let registry = registry();
        let func = registry
            .resolve(DataSource::SpotifyApi, "tracks", &None)
            .unwrap();
        match func {
            FetchFunction::Batch(batch) => assert_eq!(batch.max_batch_size(), 50),
            FetchFunction::SingleItem(_) => panic!("expected a batch fetch function"),
        }
    }
}
