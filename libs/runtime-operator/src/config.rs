//! Typed configuration handed from the operator to pipeline sinks.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const SERVICE_URL: &str = "pulsar.client.serviceUrl";
pub const ADMIN_URL: &str = "pulsar.admin.adminUrl";
pub const ENABLE_TRANSACTION: &str = "pulsar.client.enableTransaction";
pub const DELIVERY_GUARANTEE: &str = "pulsar.sink.deliveryGuarantee";
pub const TRANSACTION_TIMEOUT_MILLIS: &str = "pulsar.sink.transactionTimeoutMillis";
pub const SEND_TIMEOUT_MS: &str = "pulsar.sink.sendTimeoutMs";

/// Transaction timeout written into exactly-once sink configurations.
pub const SINK_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryGuarantee {
    /// Fire and forget. Records may be lost on failure.
    #[default]
    None,
    /// Flush on every checkpoint. Records may be duplicated on failure.
    AtLeastOnce,
    /// Transactional writes committed on checkpoint.
    ExactlyOnce,
}

impl DeliveryGuarantee {
    pub const ALL: [DeliveryGuarantee; 3] = [
        DeliveryGuarantee::None,
        DeliveryGuarantee::AtLeastOnce,
        DeliveryGuarantee::ExactlyOnce,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryGuarantee::None => "NONE",
            DeliveryGuarantee::AtLeastOnce => "AT_LEAST_ONCE",
            DeliveryGuarantee::ExactlyOnce => "EXACTLY_ONCE",
        }
    }
}

impl fmt::Display for DeliveryGuarantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryGuarantee {
    type Err = String;

    /// Accepts `EXACTLY_ONCE`, `exactly-once` and `exactly_once` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        DeliveryGuarantee::ALL
            .into_iter()
            .find(|g| g.as_str() == normalized)
            .ok_or_else(|| format!("unknown delivery guarantee '{s}' (expected NONE, AT_LEAST_ONCE or EXACTLY_ONCE)"))
    }
}

/// Typed config value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    I64(i64),
    Str(String),
    Guarantee(DeliveryGuarantee),
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::I64(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

impl From<DeliveryGuarantee> for ConfigValue {
    fn from(v: DeliveryGuarantee) -> Self {
        ConfigValue::Guarantee(v)
    }
}

/// Ordered key → value map. Setting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    entries: Vec<(String, ConfigValue)>,
}

impl Configuration {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == &key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(ConfigValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(ConfigValue::I64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ConfigValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Guarantee under `DELIVERY_GUARANTEE`; a string value is parsed.
    pub fn get_guarantee(&self, key: &str) -> Option<DeliveryGuarantee> {
        match self.get(key) {
            Some(ConfigValue::Guarantee(g)) => Some(*g),
            Some(ConfigValue::Str(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_existing_key() {
        let mut config = Configuration::new();
        config.set(SEND_TIMEOUT_MS, 30_000i64);
        config.set(SEND_TIMEOUT_MS, 0i64);
        assert_eq!(config.len(), 1);
        assert_eq!(config.get_i64(SEND_TIMEOUT_MS), Some(0));
        assert_eq!(config.get_str(SEND_TIMEOUT_MS), None);
    }

    #[test]
    fn guarantee_parses_common_spellings() {
        assert_eq!("EXACTLY_ONCE".parse::<DeliveryGuarantee>(), Ok(DeliveryGuarantee::ExactlyOnce));
        assert_eq!("at-least-once".parse::<DeliveryGuarantee>(), Ok(DeliveryGuarantee::AtLeastOnce));
        assert_eq!(" none ".parse::<DeliveryGuarantee>(), Ok(DeliveryGuarantee::None));
        assert!("twice".parse::<DeliveryGuarantee>().is_err());
    }

    #[test]
    fn guarantee_stored_as_string_is_readable() {
        let mut config = Configuration::new();
        config.set(DELIVERY_GUARANTEE, "at_least_once");
        assert_eq!(config.get_guarantee(DELIVERY_GUARANTEE), Some(DeliveryGuarantee::AtLeastOnce));
    }
}
