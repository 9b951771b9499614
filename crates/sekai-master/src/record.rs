//! Opaque master data records.

use crate::error::{MasterDataError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// A single immutable master data record.
///
/// Records are JSON objects carrying a non-negative integer `id` that is unique
/// within their kind. The payload is reference-counted so that records handed
/// out to many readers (and held by the in-memory tier) share one allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: u64,
    value: Arc<Value>,
}

impl Record {
    /// Name of the field every record is keyed by.
    pub const ID_FIELD: &'static str = "id";

    /// Wrap a JSON value, validating that it carries an integer id.
    pub fn new(value: Value) -> Result<Self> {
        let id = value
            .get(Self::ID_FIELD)
            .and_then(Value::as_u64)
            .ok_or_else(|| MasterDataError::InvalidRecord {
                message: format!("record has no integer `{}` field", Self::ID_FIELD),
            })?;
        Ok(Self {
            id,
            value: Arc::new(value),
        })
    }

    /// Build a record from any serializable model.
    pub fn from_model<T: Serialize>(model: &T) -> Result<Self> {
        Self::new(serde_json::to_value(model)?)
    }

    /// Parse a record from its serialized form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::new(serde_json::from_slice(bytes)?)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Decode the record into a typed model.
    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(self.value.as_ref()).map_err(|e| MasterDataError::Json {
            message: format!("Failed to decode record {}: {}", self.id, e),
            source: Some(e),
        })
    }

    /// Serialized form written to the store.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self.value.as_ref())?)
    }
}
