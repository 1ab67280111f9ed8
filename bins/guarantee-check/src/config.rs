use std::time::Duration;

use broker_memory::MemoryBrokerConfig;
use clap::{Args, Parser, Subcommand};
use pipeline::VerificationSettings;
use runtime_operator::{DeliveryGuarantee, OperatorSettings};
use serde::Deserialize;

use crate::error::CheckError;

#[derive(Parser)]
#[command(name = "guarantee-check", about = "Broker delivery guarantee checks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream records through a sink and verify what the topic received
    Verify(VerifyArgs),
}

#[derive(Args, Clone, Debug)]
pub struct VerifyArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "guarantee-check.toml", env = "GUARANTEE_CHECK_CONFIG")]
    pub config: String,

    /// NONE, AT_LEAST_ONCE or EXACTLY_ONCE. All three when omitted
    #[arg(long)]
    pub guarantee: Option<DeliveryGuarantee>,

    /// Partitions of the generated topic
    #[arg(long)]
    pub partitions: Option<i32>,

    /// Exact number of records to stream
    #[arg(long)]
    pub records: Option<usize>,
}

// ---- TOML Config ----

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_broker")]
    pub broker: String,
    pub operator: Option<OperatorSettings>,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub memory: MemoryBrokerConfig,
}

fn default_broker() -> String {
    "memory".into()
}

#[derive(Debug, Default, Deserialize)]
pub struct VerificationConfig {
    pub partitions: Option<i32>,
    pub min_records: Option<usize>,
    pub max_records: Option<usize>,
    pub checkpoint_interval_ms: Option<u64>,
    pub emit_interval_ms: Option<u64>,
    pub drain_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &str) -> Result<Self, CheckError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CheckError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        toml::from_str(&content)
            .map_err(|e| CheckError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }
}

// ---- Effective: config file < CLI ----

pub struct Effective {
    pub broker: String,
    pub operator: OperatorSettings,
    pub memory: MemoryBrokerConfig,
    pub guarantees: Vec<DeliveryGuarantee>,
    pub settings: VerificationSettings,
}

impl Effective {
    pub fn new(args: &VerifyArgs) -> Result<Self, CheckError> {
        let cfg = if std::path::Path::new(&args.config).exists() {
            FileConfig::load(&args.config)?
        } else {
            tracing::info!(config = %args.config, "config file not found, using defaults");
            FileConfig { broker: default_broker(), ..FileConfig::default() }
        };

        let defaults = VerificationSettings::default();
        let v = &cfg.verification;
        let mut settings = VerificationSettings {
            partitions: args.partitions.or(v.partitions).unwrap_or(defaults.partitions),
            min_records: v.min_records.unwrap_or(defaults.min_records),
            max_records: v.max_records.unwrap_or(defaults.max_records),
            checkpoint_interval: v
                .checkpoint_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.checkpoint_interval),
            emit_interval: v.emit_interval_ms.map(Duration::from_millis).unwrap_or(defaults.emit_interval),
            drain_timeout: v.drain_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.drain_timeout),
        };
        if let Some(records) = args.records {
            settings.min_records = records;
            settings.max_records = records.checked_add(1).ok_or_else(|| CheckError::Config {
                context: "verification",
                detail: format!("--records {records} is too large"),
            })?;
        }
        if settings.partitions < 0 {
            return Err(CheckError::Config {
                context: "verification",
                detail: format!("partitions must not be negative, got {}", settings.partitions),
            });
        }
        if settings.min_records >= settings.max_records {
            return Err(CheckError::Config {
                context: "verification",
                detail: format!(
                    "min_records ({}) must be below max_records ({})",
                    settings.min_records, settings.max_records
                ),
            });
        }

        let guarantees = match args.guarantee {
            Some(g) => vec![g],
            None => DeliveryGuarantee::ALL.to_vec(),
        };

        Ok(Self {
            broker: cfg.broker,
            operator: cfg
                .operator
                .unwrap_or_else(|| OperatorSettings::new("pulsar://localhost:6650", "http://localhost:8080")),
            memory: cfg.memory,
            guarantees,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config: &str) -> VerifyArgs {
        VerifyArgs { config: config.into(), guarantee: None, partitions: None, records: None }
    }

    #[test]
    fn file_config_parses_every_section() {
        let cfg: FileConfig = toml::from_str(
            r#"
            broker = "memory"
            [operator]
            service_url = "pulsar://broker:6650"
            admin_url = "http://broker:8080"
            [verification]
            partitions = 2
            checkpoint_interval_ms = 50
            [memory]
            auto_create_topics = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.operator.unwrap().service_url, "pulsar://broker:6650");
        assert_eq!(cfg.verification.partitions, Some(2));
        assert_eq!(cfg.verification.checkpoint_interval_ms, Some(50));
        assert!(!cfg.memory.auto_create_topics);
        assert_eq!(cfg.memory.cluster, "standalone");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let eff = Effective::new(&args("/nonexistent/guarantee-check.toml")).unwrap();
        assert_eq!(eff.broker, "memory");
        assert_eq!(eff.guarantees, DeliveryGuarantee::ALL.to_vec());
        assert_eq!(eff.settings.partitions, 4);
        assert_eq!(eff.settings.checkpoint_interval, Duration::from_millis(500));
    }

    #[test]
    fn cli_flags_override_the_file() {
        let mut a = args("/nonexistent/guarantee-check.toml");
        a.guarantee = Some(DeliveryGuarantee::ExactlyOnce);
        a.partitions = Some(8);
        a.records = Some(50);
        let eff = Effective::new(&a).unwrap();
        assert_eq!(eff.guarantees, vec![DeliveryGuarantee::ExactlyOnce]);
        assert_eq!(eff.settings.partitions, 8);
        assert_eq!((eff.settings.min_records, eff.settings.max_records), (50, 51));
    }

    #[test]
    fn record_count_at_the_limit_is_rejected() {
        let mut a = args("/nonexistent/guarantee-check.toml");
        a.records = Some(usize::MAX);
        let err = Effective::new(&a).err().unwrap();
        assert!(matches!(err, CheckError::Config { context: "verification", .. }));
    }

    #[test]
    fn cli_parses_guarantee_names() {
        let cli = Cli::try_parse_from(["guarantee-check", "verify", "--guarantee", "at-least-once"]).unwrap();
        let Commands::Verify(a) = cli.command;
        assert_eq!(a.guarantee, Some(DeliveryGuarantee::AtLeastOnce));
    }
}
