//! `dummy-api` fetch functions: deterministic, dependency-free task types
//! used for tests and demos. Grounded on
//! `app/tasks/fetch_functions/data_sources/dummy_api.py`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{FetchError, SingleItemFetch};

/// `echo`: returns `{"input": <item>}`, optionally after a fixed delay.
pub struct EchoFetch {
    delay_ms: u64,
}

#[derive(Deserialize, Default)]
struct EchoParams {
    #[serde(default)]
    delay_ms: u64,
}

impl EchoFetch {
    pub fn from_params(params: &super::Params) -> Self {
        let parsed: EchoParams = params
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        EchoFetch {
            delay_ms: parsed.delay_ms,
        }
    }
}

#[async_trait]
impl SingleItemFetch for EchoFetch {
    async fn call(&self, input: &Value) -> Result<Option<Value>, FetchError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        Ok(Some(json!({ "input": input })))
    }
}

/// `flaky`: raises a non-fatal error with probability `flakiness`,
/// otherwise echoes the input back successfully.
pub struct FlakyFetch {
    flakiness: f64,
}

#[derive(Deserialize, Default)]
struct FlakyParams {
    #[serde(default)]
    flakiness: f64,
}

impl FlakyFetch {
    pub fn from_params(params: &super::Params) -> Self {
        let parsed: FlakyParams = params
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        FlakyFetch {
            flakiness: parsed.flakiness,
        }
    }
}

#[async_trait]
impl SingleItemFetch for FlakyFetch {
    async fn call(&self, input: &Value) -> Result<Option<Value>, FetchError> {
        let roll: f64 = rand_unit_interval();
        if roll < self.flakiness {
            return Err(FetchError::non_fatal(format!(
                "flaky failure (roll {roll:.3} < flakiness {:.3})",
                self.flakiness
            )));
        }
        Ok(Some(json!({ "input": input })))
    }
}

/// `throw-above-threshold`: succeeds for inputs `<= threshold`, raises a
/// non-fatal error otherwise. Expects the input to be (or contain) a
/// number.
pub struct ThrowAboveThresholdFetch {
    threshold: f64,
}

#[derive(Deserialize, Default)]
struct ThresholdParams {
    #[serde(default = "default_threshold")]
    threshold: f64,
}

fn default_threshold() -> f64 {
    f64::INFINITY
}

impl ThrowAboveThresholdFetch {
    pub fn from_params(params: &super::Params) -> Self {
        let parsed: ThresholdParams = params
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(ThresholdParams {
                threshold: default_threshold(),
            });
        ThrowAboveThresholdFetch {
            threshold: parsed.threshold,
        }
    }
}

#[async_trait]
impl SingleItemFetch for ThrowAboveThresholdFetch {
    async fn call(&self, input: &Value) -> Result<Option<Value>, FetchError> {
        let value = input
            .as_f64()
            .ok_or_else(|| FetchError::fatal("throw-above-threshold requires a numeric input"))?;
        if value > self.threshold {
            return Err(FetchError::non_fatal(format!(
                "{value} exceeds threshold {}",
                self.threshold
            )));
        }
        Ok(Some(json!({ "input": input })))
    }
}

/// A tiny, dependency-free PRNG so tests stay deterministic given a fixed
/// process and don't need the `rand` crate's thread-local RNG wired
/// through async boundaries. Not cryptographic; fine for `flakiness`.
fn rand_unit_interval() -> f64 {
    use std::cell::Cell;
    use std::time::{SystemTime, UNIX_EPOCH};

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64 | 1
        );
    }

    STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x as f64 / u64::MAX as f64).abs().fract()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_wraps_input() {
        let fetch = EchoFetch::from_params(&None);
        let out = fetch.call(&json!(42)).await.unwrap().unwrap();
        assert_eq!(out, json!({ "input": 42 }));
    }

    #[tokio::test]
    async fn flaky_never_fails_at_zero_flakiness() {
        let fetch = FlakyFetch::from_params(&Some(json!({ "flakiness": 0.0 })));
        for i in 0..20 {
            assert!(fetch.call(&json!(i)).await.is_ok());
        }
    }

    #[tokio::test]
    async fn threshold_rejects_above_limit() {
        let fetch = ThrowAboveThresholdFetch::from_params(&Some(json!({ "threshold": 5 })));
        assert!(fetch.call(&json!(5)).await.unwrap().is_some());
        let err = fetch.call(&json!(6)).await.unwrap_err();
        assert!(!err.is_fatal());
    }
}
