use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker_api::BoxFuture;
use runtime_operator::random_alphanumeric;
use tokio::time::{Interval, MissedTickBehavior};

use crate::PipelineError;

/// Bounded or unbounded stream of records feeding a job.
pub trait RecordSource<T>: Send {
    /// Next record, `None` at end of input. Cancel-safe: dropping the
    /// future before completion loses no record.
    fn next(&mut self) -> BoxFuture<'_, Result<Option<T>, PipelineError>>;

    /// Persist state for checkpoint `checkpoint_id`.
    fn snapshot_state(&mut self, checkpoint_id: u64) -> Result<(), PipelineError>;

    /// Checkpoint `checkpoint_id` has been committed by the sink.
    fn notify_checkpoint_complete(&mut self, checkpoint_id: u64);
}

/// Records a source emitted, shared with whoever verifies them.
#[derive(Debug, Clone, Default)]
pub struct ExpectedRecords {
    inner: Arc<Mutex<Vec<String>>>,
}

impl ExpectedRecords {
    fn push(&self, record: String) {
        match self.inner.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(records) => records.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Emits `count` random alphanumeric strings, one per `interval`, and
/// remembers every emitted string in its `ExpectedRecords`.
pub struct ControlSource {
    remaining: usize,
    record_len: usize,
    interval: Duration,
    /// Created on first use; needs a running runtime.
    ticker: Option<Interval>,
    expected: ExpectedRecords,
    emitted: usize,
    last_snapshot: Option<(u64, usize)>,
}

impl ControlSource {
    pub const RECORD_LEN: usize = 20;

    pub fn new(count: usize, interval: Duration) -> Self {
        Self {
            remaining: count,
            record_len: Self::RECORD_LEN,
            // A zero period panics in `tokio::time::interval`.
            interval: interval.max(Duration::from_micros(1)),
            ticker: None,
            expected: ExpectedRecords::default(),
            emitted: 0,
            last_snapshot: None,
        }
    }

    pub fn expected(&self) -> ExpectedRecords {
        self.expected.clone()
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

impl RecordSource<String> for ControlSource {
    fn next(&mut self) -> BoxFuture<'_, Result<Option<String>, PipelineError>> {
        Box::pin(async move {
            if self.remaining == 0 {
                return Ok(None);
            }
            let period = self.interval;
            let ticker = self.ticker.get_or_insert_with(|| {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
            // `tick` is cancel-safe; the record is produced after it.
            ticker.tick().await;
            let record = random_alphanumeric(self.record_len);
            self.expected.push(record.clone());
            self.remaining -= 1;
            self.emitted += 1;
            Ok(Some(record))
        })
    }

    fn snapshot_state(&mut self, checkpoint_id: u64) -> Result<(), PipelineError> {
        self.last_snapshot = Some((checkpoint_id, self.emitted));
        tracing::debug!(checkpoint_id, emitted = self.emitted, "source state snapshotted");
        Ok(())
    }

    fn notify_checkpoint_complete(&mut self, checkpoint_id: u64) {
        if let Some((id, emitted)) = self.last_snapshot {
            if id == checkpoint_id {
                tracing::debug!(checkpoint_id, emitted, "checkpoint complete");
            }
        }
    }
}

/// Replays a fixed list of records. Used where a deterministic input is
/// needed.
pub struct VecSource<T> {
    records: std::vec::IntoIter<T>,
}

impl<T> VecSource<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self { records: records.into_iter() }
    }
}

impl<T: Send> RecordSource<T> for VecSource<T> {
    fn next(&mut self) -> BoxFuture<'_, Result<Option<T>, PipelineError>> {
        let next = self.records.next();
        Box::pin(async move { Ok(next) })
    }

    fn snapshot_state(&mut self, _checkpoint_id: u64) -> Result<(), PipelineError> {
        Ok(())
    }

    fn notify_checkpoint_complete(&mut self, _checkpoint_id: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn control_source_emits_count_and_records_expected() {
        let mut source = ControlSource::new(5, Duration::from_millis(1));
        let expected = source.expected();

        let mut emitted = Vec::new();
        while let Some(record) = source.next().await.unwrap() {
            assert_eq!(record.len(), ControlSource::RECORD_LEN);
            emitted.push(record);
        }

        assert_eq!(emitted.len(), 5);
        assert_eq!(expected.snapshot(), emitted);
        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_count_ends_immediately() {
        let mut source = ControlSource::new(0, Duration::from_secs(3600));
        assert!(source.next().await.unwrap().is_none());
        assert!(source.expected().is_empty());
    }
}
