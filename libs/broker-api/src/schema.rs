use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::BrokerError;

/// Payload type a schema declares to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    Bytes,
    String,
    Json,
}

impl std::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaType::Bytes => f.write_str("BYTES"),
            SchemaType::String => f.write_str("STRING"),
            SchemaType::Json => f.write_str("JSON"),
        }
    }
}

/// Schema description registered on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    pub name: String,
    pub schema_type: SchemaType,
    /// Type definition; empty for primitive schemas.
    pub definition: String,
}

impl SchemaInfo {
    pub fn bytes() -> Self {
        Self {
            name: "Bytes".into(),
            schema_type: SchemaType::Bytes,
            definition: String::new(),
        }
    }

    pub fn string() -> Self {
        Self {
            name: "String".into(),
            schema_type: SchemaType::String,
            definition: String::new(),
        }
    }
}

/// Serialization strategy for messages of type `T`.
///
/// Producers encode with it, consumers decode with it and the admin
/// registers `schema_info()` on the topic.
pub trait Schema<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, BrokerError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, BrokerError>;

    fn schema_info(&self) -> SchemaInfo;
}

/// UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSchema;

impl Schema<String> for StringSchema {
    fn encode(&self, value: &String) -> Result<Vec<u8>, BrokerError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, BrokerError> {
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    fn schema_info(&self) -> SchemaInfo {
        SchemaInfo::string()
    }
}

/// Raw bytes, passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSchema;

impl Schema<Vec<u8>> for BytesSchema {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, BrokerError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, BrokerError> {
        Ok(bytes.to_vec())
    }

    fn schema_info(&self) -> SchemaInfo {
        SchemaInfo::bytes()
    }
}

/// JSON documents of any serde type.
pub struct JsonSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Schema<T> for JsonSchema<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, BrokerError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, BrokerError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn schema_info(&self) -> SchemaInfo {
        let type_name = std::any::type_name::<T>();
        SchemaInfo {
            name: type_name.rsplit("::").next().unwrap_or(type_name).to_string(),
            schema_type: SchemaType::Json,
            definition: type_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Quote {
        symbol: String,
        bid: f64,
    }

    #[test]
    fn string_schema_rejects_invalid_utf8() {
        let err = StringSchema.decode(&[0xc3, 0x28]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn json_schema_describes_type() {
        let schema = JsonSchema::<Quote>::new();
        let info = schema.schema_info();
        assert_eq!(info.name, "Quote");
        assert_eq!(info.schema_type, SchemaType::Json);

        let bytes = schema.encode(&Quote { symbol: "EURUSD".into(), bid: 1.085 }).unwrap();
        let decoded = schema.decode(&bytes).unwrap();
        assert_eq!(decoded.symbol, "EURUSD");
    }
}
