use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::sink::CommittingSink;
use crate::source::RecordSource;
use crate::PipelineError;

/// Outcome of a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub records: u64,
    pub checkpoints: u64,
    /// The job stopped on its cancellation token rather than end of input.
    pub cancelled: bool,
}

/// Runs a source into a sink, checkpointing on a fixed interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamEnvironment {
    checkpoint_interval: Option<Duration>,
}

impl StreamEnvironment {
    /// Environment without periodic checkpoints. The final checkpoint at end
    /// of input still runs.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpointing(interval: Duration) -> Self {
        Self {
            checkpoint_interval: Some(interval.max(Duration::from_millis(1))),
        }
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.checkpoint_interval
    }

    /// Open the sink, pump records until the source ends or `token` fires,
    /// then close the sink.
    ///
    /// End of input triggers a final checkpoint. Cancellation does not, so
    /// anything the sink has not committed yet is discarded on close.
    pub async fn execute<T, S>(
        &self,
        source: &mut dyn RecordSource<T>,
        sink: &mut S,
        token: CancellationToken,
    ) -> Result<JobSummary, PipelineError>
    where
        T: Send + 'static,
        S: CommittingSink<T>,
    {
        if let Err(e) = sink.open().await {
            if let Err(close_err) = sink.close().await {
                tracing::warn!(error = %close_err, "failed to close sink after open error");
            }
            return Err(e);
        }
        tracing::info!(checkpoint_interval = ?self.checkpoint_interval, "job started");

        let result = self.pump(source, sink, &token).await;
        let closed = sink.close().await;

        match (result, closed) {
            (Err(e), _) => {
                tracing::error!(error = %e, "job failed");
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
            (Ok(summary), Ok(())) => {
                tracing::info!(
                    records = summary.records,
                    checkpoints = summary.checkpoints,
                    cancelled = summary.cancelled,
                    "job finished"
                );
                Ok(summary)
            }
        }
    }

    /// Run the job on its own task.
    pub fn spawn_job<T, S>(
        self,
        mut source: Box<dyn RecordSource<T>>,
        mut sink: S,
        token: CancellationToken,
    ) -> JoinHandle<Result<JobSummary, PipelineError>>
    where
        T: Send + 'static,
        S: CommittingSink<T> + 'static,
    {
        tokio::spawn(async move { self.execute(source.as_mut(), &mut sink, token).await })
    }

    async fn pump<T, S>(
        &self,
        source: &mut dyn RecordSource<T>,
        sink: &mut S,
        token: &CancellationToken,
    ) -> Result<JobSummary, PipelineError>
    where
        T: Send + 'static,
        S: CommittingSink<T>,
    {
        let mut summary = JobSummary::default();
        let mut ticker = self.checkpoint_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!(records = summary.records, "job cancelled");
                    summary.cancelled = true;
                    return Ok(summary);
                }
                _ = next_tick(&mut ticker) => {
                    summary.checkpoints += 1;
                    checkpoint(summary.checkpoints, source, sink).await?;
                }
                next = source.next() => match next? {
                    Some(record) => {
                        sink.write(record).await?;
                        summary.records += 1;
                    }
                    None => {
                        summary.checkpoints += 1;
                        checkpoint(summary.checkpoints, source, sink).await?;
                        return Ok(summary);
                    }
                },
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn checkpoint<T, S>(id: u64, source: &mut dyn RecordSource<T>, sink: &mut S) -> Result<(), PipelineError>
where
    S: CommittingSink<T>,
{
    let committables = sink.prepare_commit().await?;
    source.snapshot_state(id)?;
    let pending = committables.len();
    sink.commit(committables).await?;
    source.notify_checkpoint_complete(id);
    tracing::debug!(checkpoint_id = id, committed = pending, "checkpoint complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use broker_api::BoxFuture;

    use super::*;
    use crate::source::VecSource;

    /// Records every call in order.
    #[derive(Clone, Default)]
    struct RecordingSink {
        log: Arc<Mutex<Vec<String>>>,
        buffered: Vec<u32>,
        refuse_open: bool,
    }

    impl RecordingSink {
        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl CommittingSink<u32> for RecordingSink {
        type Committable = Vec<u32>;

        fn open(&mut self) -> BoxFuture<'_, Result<(), PipelineError>> {
            self.push("open".into());
            let refuse = self.refuse_open;
            Box::pin(async move {
                if refuse {
                    return Err(PipelineError::Config("sink refused to open".into()));
                }
                Ok(())
            })
        }

        fn write(&mut self, record: u32) -> BoxFuture<'_, Result<(), PipelineError>> {
            self.buffered.push(record);
            Box::pin(async { Ok(()) })
        }

        fn prepare_commit(&mut self) -> BoxFuture<'_, Result<Vec<Vec<u32>>, PipelineError>> {
            let batch = std::mem::take(&mut self.buffered);
            self.push(format!("prepare {}", batch.len()));
            Box::pin(async move { Ok(vec![batch]) })
        }

        fn commit(&mut self, committables: Vec<Vec<u32>>) -> BoxFuture<'_, Result<(), PipelineError>> {
            let total: usize = committables.iter().map(Vec::len).sum();
            self.push(format!("commit {total}"));
            Box::pin(async { Ok(()) })
        }

        fn close(&mut self) -> BoxFuture<'_, Result<(), PipelineError>> {
            self.push(format!("close {}", self.buffered.len()));
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn end_of_input_runs_a_final_checkpoint_before_close() {
        let mut source = VecSource::new(vec![1u32, 2, 3]);
        let mut sink = RecordingSink::default();

        let summary = StreamEnvironment::new()
            .execute(&mut source, &mut sink, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, JobSummary { records: 3, checkpoints: 1, cancelled: false });
        assert_eq!(sink.log(), vec!["open", "prepare 3", "commit 3", "close 0"]);
    }

    #[tokio::test]
    async fn cancelled_job_closes_without_checkpoint() {
        let mut source = VecSource::new(vec![1u32, 2, 3]);
        let mut sink = RecordingSink::default();
        let token = CancellationToken::new();
        token.cancel();

        let summary = StreamEnvironment::with_checkpointing(Duration::from_millis(10))
            .execute(&mut source, &mut sink, token)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.checkpoints, 0);
        assert_eq!(sink.log(), vec!["open", "close 0"]);
    }

    #[tokio::test]
    async fn failed_open_still_closes_the_sink() {
        let mut source = VecSource::new(vec![1u32]);
        let mut sink = RecordingSink { refuse_open: true, ..RecordingSink::default() };

        let err = StreamEnvironment::new()
            .execute(&mut source, &mut sink, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert_eq!(sink.log(), vec!["open", "close 0"]);
    }

    #[tokio::test]
    async fn spawned_job_reports_its_summary() {
        let sink = RecordingSink::default();
        let handle = StreamEnvironment::new().spawn_job(
            Box::new(VecSource::new((0..10u32).collect())),
            sink.clone(),
            CancellationToken::new(),
        );
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.records, 10);
        assert_eq!(sink.log().last().map(String::as_str), Some("close 0"));
    }
}
