//! End-to-end delivery guarantee check.
//!
//! A run provisions a fresh topic, streams a random number of records into it
//! through a [`BrokerSink`] under the chosen guarantee, then drains the topic
//! and compares what arrived against what the source emitted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use broker_api::{BrokerConnector, StringSchema};
use rand::Rng;
use rand::distr::Alphabetic;
use runtime_operator::{DeliveryGuarantee, RuntimeOperator};
use tokio_util::sync::CancellationToken;

use crate::environment::StreamEnvironment;
use crate::sink::BrokerSink;
use crate::source::ControlSource;
use crate::PipelineError;

const TOPIC_NAME_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Setup,
    Run,
    Verify,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Setup => "setup",
            RunState::Run => "run",
            RunState::Verify => "verify",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct VerificationSettings {
    pub partitions: i32,
    /// Record count is drawn from `[min_records, max_records)`.
    pub min_records: usize,
    pub max_records: usize,
    pub checkpoint_interval: Duration,
    pub emit_interval: Duration,
    /// Quiet period that ends the final drain.
    pub drain_timeout: Duration,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            partitions: 4,
            min_records: 100,
            max_records: 200,
            checkpoint_interval: Duration::from_millis(500),
            emit_interval: Duration::from_millis(1),
            drain_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub topic: String,
    pub guarantee: DeliveryGuarantee,
    pub expected: usize,
    pub consumed: usize,
    pub checkpoints: u64,
    pub elapsed: Duration,
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on '{}': {} expected, {} consumed, {} checkpoints in {:?}",
            self.guarantee, self.topic, self.expected, self.consumed, self.checkpoints, self.elapsed
        )
    }
}

/// One guarantee check against one broker.
pub struct DeliveryVerification<'a> {
    operator: &'a RuntimeOperator,
    connector: Arc<dyn BrokerConnector>,
    settings: VerificationSettings,
    state: RunState,
}

impl<'a> DeliveryVerification<'a> {
    /// `connector` must reach the broker `operator` is connected to; the sink
    /// opens its own connections through it.
    pub fn new(
        operator: &'a RuntimeOperator,
        connector: Arc<dyn BrokerConnector>,
        settings: VerificationSettings,
    ) -> Self {
        Self { operator, connector, settings, state: RunState::Setup }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn run(&mut self, guarantee: DeliveryGuarantee) -> Result<VerificationReport, PipelineError> {
        let started = Instant::now();
        self.state = RunState::Setup;
        match self.stages(guarantee, started).await {
            Ok(report) => {
                self.transition(RunState::Done);
                tracing::info!(%report, "delivery guarantee verified");
                Ok(report)
            }
            Err(e) => {
                tracing::error!(state = %self.state, guarantee = %guarantee, error = %e, "verification failed");
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    async fn stages(
        &mut self,
        guarantee: DeliveryGuarantee,
        started: Instant,
    ) -> Result<VerificationReport, PipelineError> {
        if self.settings.min_records >= self.settings.max_records {
            return Err(PipelineError::Config(format!(
                "record range [{}, {}) is empty",
                self.settings.min_records, self.settings.max_records
            )));
        }

        // Setup
        let topic = random_topic_name();
        self.operator.create_topic(&topic, self.settings.partitions).await?;
        self.operator.create_schema(&topic, &StringSchema).await?;
        let count = rand::rng().random_range(self.settings.min_records..self.settings.max_records);
        let mut source = ControlSource::new(count, self.settings.emit_interval);
        let expected = source.expected();
        tracing::info!(topic = %topic, guarantee = %guarantee, records = count, "topic provisioned");

        // Run
        self.transition(RunState::Run);
        let mut sink = BrokerSink::builder(self.connector.clone())
            .config(&self.operator.sink_config(guarantee))
            .topics([topic.clone()])
            .serialization_schema(StringSchema)
            .build()?;
        let env = match guarantee {
            DeliveryGuarantee::None => StreamEnvironment::new(),
            _ => StreamEnvironment::with_checkpointing(self.settings.checkpoint_interval),
        };
        let summary = env.execute(&mut source, &mut sink, CancellationToken::new()).await?;

        // Verify
        self.transition(RunState::Verify);
        let consumed: Vec<String> = self
            .operator
            .receive_all_messages(&topic, &StringSchema, self.settings.drain_timeout)
            .await?
            .into_iter()
            .map(|m| m.into_value())
            .collect();
        let expected = expected.snapshot();
        compare_multisets(&expected, &consumed)?;

        Ok(VerificationReport {
            topic,
            guarantee,
            expected: expected.len(),
            consumed: consumed.len(),
            checkpoints: summary.checkpoints,
            elapsed: started.elapsed(),
        })
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = %self.state, to = %next, "verification state");
        self.state = next;
    }
}

/// Run one check with a fresh [`DeliveryVerification`].
pub async fn verify_delivery_guarantee(
    operator: &RuntimeOperator,
    connector: Arc<dyn BrokerConnector>,
    guarantee: DeliveryGuarantee,
    settings: VerificationSettings,
) -> Result<VerificationReport, PipelineError> {
    DeliveryVerification::new(operator, connector, settings).run(guarantee).await
}

fn random_topic_name() -> String {
    rand::rng()
        .sample_iter(&Alphabetic)
        .take(TOPIC_NAME_LEN)
        .map(char::from)
        .collect()
}

/// Equal as multisets, which also means equal length.
fn compare_multisets(expected: &[String], actual: &[String]) -> Result<(), PipelineError> {
    let mut balance: HashMap<&str, i64> = HashMap::new();
    for record in expected {
        *balance.entry(record.as_str()).or_insert(0) += 1;
    }
    for record in actual {
        *balance.entry(record.as_str()).or_insert(0) -= 1;
    }

    let mut missing = Vec::new();
    let mut unexpected = Vec::new();
    for (record, n) in balance {
        if n > 0 {
            missing.extend(std::iter::repeat_n(record.to_string(), n as usize));
        } else if n < 0 {
            unexpected.extend(std::iter::repeat_n(record.to_string(), n.unsigned_abs() as usize));
        }
    }

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        missing.sort();
        unexpected.sort();
        Err(PipelineError::Verification { missing, unexpected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn multisets_ignore_order() {
        compare_multisets(&strings(&["a", "b", "a"]), &strings(&["a", "a", "b"])).unwrap();
    }

    #[test]
    fn duplicates_and_losses_are_reported() {
        let err = compare_multisets(&strings(&["a", "b", "c"]), &strings(&["a", "a", "b"])).unwrap_err();
        match err {
            PipelineError::Verification { missing, unexpected } => {
                assert_eq!(missing, strings(&["c"]));
                assert_eq!(unexpected, strings(&["a"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn topic_names_are_eight_letters() {
        let name = random_topic_name();
        assert_eq!(name.len(), TOPIC_NAME_LEN);
        assert!(name.chars().all(|c| c.is_ascii_alphabetic()));
    }
}
