//! The Queue Item Manager (§4.2): the processing primitives the Task
//! Processor drives, sitting atop the [`crate::queue_store::QueueStore`].
//!
//! Grounded directly on `TaskQueueItemManager` in the original system's
//! `app/tasks/queue_item_management.py` (`process_next_input_item`,
//! `process_next_input_item_chunk`, `add_inputs`); reimplemented against
//! the durable queue store instead of a vendored queue library, and with
//! the ack/restore semantics corrected per §9's "Open questions" (ack on
//! non-fatal, restore only on Fatal).

mod error;

pub use error::{Error, ErrorKind, Result};

use async_trait::async_trait;
use itertools::Itertools;
use serde_json::Value;

use crate::queue_store::{Page, QueueStore};
use crate::registry::{BatchFetch, Classification, FetchError, SingleItemFetch};
use crate::types::{QueueItemCounts, QueueName};

/// The outcome of routing a single processed input, surfaced to callers
/// that want to react (e.g. the Task Processor's progress/logging hooks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NoData,
    NonFatalError,
}

/// Durably persists one fetch output. Implemented by the Task Processor's
/// sink+metadata-store pairing and called *before* the corresponding input
/// is routed to `successes`/acked, so a write failure leaves the input
/// poppable again instead of being lost after a successful commit (§7).
#[async_trait]
pub trait OutputWriter: Send {
    async fn write(&mut self, value: &Value) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct QueueItemManager {
    store: QueueStore,
}

impl QueueItemManager {
    pub fn new(store: QueueStore) -> Self {
        QueueItemManager { store }
    }

    /// Validates (non-empty) and durably enqueues new inputs (§4.2).
    pub fn add_inputs(&self, payloads: &[Value]) -> Result<usize> {
        if payloads.is_empty() {
            return Err(ErrorKind::EmptyInputBatch.into());
        }
        for payload in payloads {
            self.store.append(QueueName::Inputs, payload)?;
        }
        Ok(payloads.len())
    }

    pub fn queue_item_counts(&self) -> Result<QueueItemCounts> {
        Ok(QueueItemCounts {
            successes: self.store.count(QueueName::Successes)?,
            failures: self.store.count(QueueName::Failures)?,
            inputs_without_output: self.store.count(QueueName::InputsWithoutOutput)?,
            remaining: self.store.count(QueueName::Inputs)?,
        })
    }

    pub fn remaining_count(&self) -> Result<i64> {
        Ok(self.store.count(QueueName::Inputs)?)
    }

    pub fn page(&self, queue: QueueName, cursor_id: Option<i64>, limit: i64) -> Result<Page> {
        Ok(self.store.page(queue, cursor_id, limit)?)
    }

    pub fn delete_by_ids(&self, queue: QueueName, ids: &[i64]) -> Result<u64> {
        Ok(self.store.delete_by_ids(queue, ids)?)
    }

    /// Pops exactly one input and routes it through `fetch_fn` (§4.2).
    ///
    /// On `Fatal`, the pop is rolled back (`restore`) and the error is
    /// re-raised so the Task Processor can transition to `error`. Every
    /// other path acks the pop (the item is durably routed to a terminal
    /// queue, or there simply was nothing to pop).
    pub async fn process_next(&self, fetch: &dyn SingleItemFetch) -> Result<Option<Outcome>> {
        let Some(item) = self.store.pop_next(QueueName::Inputs)? else {
            return Ok(None);
        };

        match fetch.call(&item.data).await {
            Ok(None) => {
                self.store.append(QueueName::InputsWithoutOutput, &item.data)?;
                self.store.ack(QueueName::Inputs)?;
                Ok(Some(Outcome::NoData))
            }
            Ok(Some(_result)) => {
                self.store.append(QueueName::Successes, &item.data)?;
                self.store.ack(QueueName::Inputs)?;
                Ok(Some(Outcome::Success))
            }
            Err(err) if err.is_fatal() => {
                self.store.restore(QueueName::Inputs);
                Err(ErrorKind::Fatal(err).into())
            }
            Err(_err) => {
                self.store.append(QueueName::Failures, &item.data)?;
                self.store.ack(QueueName::Inputs)?;
                Ok(Some(Outcome::NonFatalError))
            }
        }
    }

    /// Like [`Self::process_next`] but durably writes the fetch output via
    /// `writer` — before the input is routed to `successes` and acked —
    /// so a write failure restores the input instead of silently losing it
    /// (§7 "output writes that themselves fail are treated as Fatal").
    pub async fn process_next_with_output(
        &self,
        fetch: &dyn SingleItemFetch,
        writer: &mut dyn OutputWriter,
    ) -> Result<Option<Outcome>> {
        let Some(item) = self.store.pop_next(QueueName::Inputs)? else {
            return Ok(None);
        };

        match fetch.call(&item.data).await {
            Ok(None) => {
                self.store.append(QueueName::InputsWithoutOutput, &item.data)?;
                self.store.ack(QueueName::Inputs)?;
                Ok(Some(Outcome::NoData))
            }
            Ok(Some(value)) => {
                if let Err(source) = writer.write(&value).await {
                    self.store.restore(QueueName::Inputs);
                    return Err(ErrorKind::OutputWrite(source).into());
                }
                self.store.append(QueueName::Successes, &item.data)?;
                self.store.ack(QueueName::Inputs)?;
                Ok(Some(Outcome::Success))
            }
            Err(err) if err.is_fatal() => {
                self.store.restore(QueueName::Inputs);
                Err(ErrorKind::Fatal(err).into())
            }
            Err(_err) => {
                self.store.append(QueueName::Failures, &item.data)?;
                self.store.ack(QueueName::Inputs)?;
                Ok(Some(Outcome::NonFatalError))
            }
        }
    }

    /// Pops up to `batch_size` inputs and routes them through `fetch`
    /// (§4.2). Every produced output is durably written via `writer`
    /// before any input in the batch is routed to a terminal queue or
    /// acked, so a write failure restores the whole batch rather than
    /// leaving some inputs acked with no persisted output (§7).
    /// `batch_size` must be `>= 2`.
    pub async fn process_next_batch_with_output(
        &self,
        fetch: &dyn BatchFetch,
        batch_size: usize,
        writer: &mut dyn OutputWriter,
    ) -> Result<Vec<(Value, Outcome)>> {
        if batch_size < 2 {
            return Err(ErrorKind::BatchSizeTooSmall(batch_size).into());
        }

        let mut batch = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            match self.store.pop_next(QueueName::Inputs)? {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<Value> = batch.iter().map(|item| item.data.clone()).collect();

        match fetch.call(&inputs).await {
            Ok(None) => {
                for item in &batch {
                    self.store.append(QueueName::InputsWithoutOutput, &item.data)?;
                }
                self.store.ack(QueueName::Inputs)?;
                Ok(batch
                    .into_iter()
                    .map(|item| (item.data, Outcome::NoData))
                    .collect())
            }
            Ok(Some(outputs)) if outputs.len() != batch.len() => {
                self.store.restore(QueueName::Inputs);
                Err(ErrorKind::Fatal(FetchError::fatal(format!(
                    "fetch function returned {} outputs for {} inputs",
                    outputs.len(),
                    batch.len()
                )))
                .into())
            }
            Ok(Some(outputs)) => {
                for output in outputs.iter().flatten() {
                    if let Err(source) = writer.write(output).await {
                        self.store.restore(QueueName::Inputs);
                        return Err(ErrorKind::OutputWrite(source).into());
                    }
                }

                let mut routed = Vec::with_capacity(batch.len());
                for (item, output) in batch.into_iter().zip_eq(outputs.into_iter()) {
                    match output {
                        Some(_) => {
                            self.store.append(QueueName::Successes, &item.data)?;
                            routed.push((item.data, Outcome::Success));
                        }
                        None => {
                            self.store.append(QueueName::InputsWithoutOutput, &item.data)?;
                            routed.push((item.data, Outcome::NoData));
                        }
                    }
                }
                self.store.ack(QueueName::Inputs)?;
                Ok(routed)
            }
            Err(err) if err.is_fatal() => {
                self.store.restore(QueueName::Inputs);
                Err(ErrorKind::Fatal(err).into())
            }
            Err(_err) => {
                for item in &batch {
                    self.store.append(QueueName::Failures, &item.data)?;
                }
                self.store.ack(QueueName::Inputs)?;
                Ok(batch
                    .into_iter()
                    .map(|item| (item.data, Outcome::NonFatalError))
                    .collect())
            }
        }
    }
}

/// The classification attached to an [`ErrorKind::Fatal`], re-exported so
/// callers matching on processor errors don't need to reach into
/// `registry` directly.
pub fn is_fatal_classification(err: &FetchError) -> bool {
    err.classification == Classification::Fatal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::dummy_api::{EchoFetch, FlakyFetch, ThrowAboveThresholdFetch};
    use serde_json::json;

    fn temp_manager() -> (tempfile::TempDir, QueueItemManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open(dir.path(), 1).unwrap();
        (dir, QueueItemManager::new(store))
    }

    struct NoopWriter;

    #[async_trait::async_trait]
    impl OutputWriter for NoopWriter {
        async fn write(&mut self, _value: &Value) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    struct FailingWriter;

    #[derive(Debug)]
    struct WriteBoom;

    impl std::fmt::Display for WriteBoom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for WriteBoom {}

    #[async_trait::async_trait]
    impl OutputWriter for FailingWriter {
        async fn write(&mut self, _value: &Value) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err(Box::new(WriteBoom))
        }
    }

    #[test]
    fn add_inputs_rejects_empty_batch() {
        let (_dir, manager) = temp_manager();
        assert!(manager.add_inputs(&[]).is_err());
    }

    #[tokio::test]
    async fn process_next_routes_success() {
        let (_dir, manager) = temp_manager();
        manager.add_inputs(&[json!(1)]).unwrap();
        let fetch = EchoFetch::from_params(&None);

        let outcome = manager.process_next(&fetch).await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::Success);
        let counts = manager.queue_item_counts().unwrap();
        assert_eq!(counts.successes, 1);
        assert_eq!(counts.remaining, 0);
    }

    #[tokio::test]
    async fn process_next_routes_non_fatal_to_failures() {
        let (_dir, manager) = temp_manager();
        manager.add_inputs(&[json!(10)]).unwrap();
        let fetch = ThrowAboveThresholdFetch::from_params(&Some(json!({ "threshold": 5 })));

        let outcome = manager.process_next(&fetch).await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::NonFatalError);
        let counts = manager.queue_item_counts().unwrap();
        assert_eq!(counts.failures, 1);
        assert_eq!(counts.remaining, 0);
    }

    #[tokio::test]
    async fn fatal_error_restores_input() {
        let (_dir, manager) = temp_manager();
        manager.add_inputs(&[json!("not-a-number")]).unwrap();
        let fetch = ThrowAboveThresholdFetch::from_params(&Some(json!({ "threshold": 5 })));

        let err = manager.process_next(&fetch).await.unwrap_err();
        assert!(matches!(err.0, ErrorKind::Fatal(_)));
        let counts = manager.queue_item_counts().unwrap();
        assert_eq!(counts.remaining, 1);
    }

    #[tokio::test]
    async fn process_next_on_empty_queue_returns_none() {
        let (_dir, manager) = temp_manager();
        let fetch = EchoFetch::from_params(&None);
        assert!(manager.process_next(&fetch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_size_of_one_is_rejected() {
        let (_dir, manager) = temp_manager();
        manager.add_inputs(&[json!(1), json!(2)]).unwrap();
        struct DummyBatch;
        #[async_trait::async_trait]
        impl crate::registry::BatchFetch for DummyBatch {
            async fn call(
                &self,
                inputs: &[Value],
            ) -> std::result::Result<Option<Vec<Option<Value>>>, FetchError> {
                Ok(Some(inputs.iter().map(|v| Some(v.clone())).collect()))
            }
            fn max_batch_size(&self) -> usize {
                1
            }
        }
        let result = manager
            .process_next_batch_with_output(&DummyBatch, 1, &mut NoopWriter)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mismatched_batch_lengths_are_fatal_and_restore() {
        let (_dir, manager) = temp_manager();
        manager.add_inputs(&[json!(1), json!(2), json!(3)]).unwrap();

        struct ShortBatch;
        #[async_trait::async_trait]
        impl crate::registry::BatchFetch for ShortBatch {
            async fn call(
                &self,
                inputs: &[Value],
            ) -> std::result::Result<Option<Vec<Option<Value>>>, FetchError> {
                Ok(Some(inputs.iter().take(inputs.len() - 1).map(|v| Some(v.clone())).collect()))
            }
            fn max_batch_size(&self) -> usize {
                3
            }
        }

        let err = manager
            .process_next_batch_with_output(&ShortBatch, 3, &mut NoopWriter)
            .await
            .unwrap_err();
        assert!(matches!(err.0, ErrorKind::Fatal(_)));
        let counts = manager.queue_item_counts().unwrap();
        assert_eq!(counts.remaining, 3);
    }

    #[tokio::test]
    async fn output_write_failure_restores_input_single_item() {
        let (_dir, manager) = temp_manager();
        manager.add_inputs(&[json!(1)]).unwrap();
        let fetch = EchoFetch::from_params(&None);

        let err = manager
            .process_next_with_output(&fetch, &mut FailingWriter)
            .await
            .unwrap_err();
        assert!(matches!(err.0, ErrorKind::OutputWrite(_)));

        let counts = manager.queue_item_counts().unwrap();
        assert_eq!(counts.remaining, 1, "failed write must restore the input");
        assert_eq!(counts.successes, 0, "no success record without a durable write");
    }

    #[tokio::test]
    async fn output_write_failure_restores_whole_batch() {
        let (_dir, manager) = temp_manager();
        manager.add_inputs(&[json!(1), json!(2)]).unwrap();

        struct EchoBatch;
        #[async_trait::async_trait]
        impl crate::registry::BatchFetch for EchoBatch {
            async fn call(
                &self,
                inputs: &[Value],
            ) -> std::result::Result<Option<Vec<Option<Value>>>, FetchError> {
                Ok(Some(inputs.iter().map(|v| Some(v.clone())).collect()))
            }
            fn max_batch_size(&self) -> usize {
                2
            }
        }

        let err = manager
            .process_next_batch_with_output(&EchoBatch, 2, &mut FailingWriter)
            .await
            .unwrap_err();
        assert!(matches!(err.0, ErrorKind::OutputWrite(_)));

        let counts = manager.queue_item_counts().unwrap();
        assert_eq!(counts.remaining, 2, "failed write must restore every popped input");
        assert_eq!(counts.successes, 0);
    }

    #[tokio::test]
    async fn flaky_with_zero_flakiness_always_succeeds() {
        let (_dir, manager) = temp_manager();
        manager.add_inputs(&[json!(1), json!(2), json!(3)]).unwrap();
        let fetch = FlakyFetch::from_params(&Some(json!({ "flakiness": 0.0 })));

        let mut successes = 0;
        while manager.remaining_count().unwrap() > 0 {
            if let Some(Outcome::Success) = manager.process_next(&fetch).await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 3);
    }
}
