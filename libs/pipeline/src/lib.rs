//! Minimal streaming runtime used to check broker delivery guarantees.
//!
//! A [`StreamEnvironment`] pumps a [`RecordSource`] into a
//! [`CommittingSink`] and drives two-phase checkpoints. [`BrokerSink`] writes
//! to broker topics under a [`DeliveryGuarantee`](runtime_operator::DeliveryGuarantee),
//! and [`driver`] runs the end-to-end check on top of both.

pub mod driver;
pub mod environment;
pub mod error;
pub mod sink;
pub mod source;

pub use driver::{
    DeliveryVerification, RunState, VerificationReport, VerificationSettings, verify_delivery_guarantee,
};
pub use environment::{JobSummary, StreamEnvironment};
pub use error::PipelineError;
pub use sink::{BrokerSink, BrokerSinkBuilder, CommittingSink, SinkCommittable};
pub use source::{ControlSource, ExpectedRecords, RecordSource, VecSource};
