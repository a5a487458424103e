//! `config/lease`, shared by every backend.

use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::framework::{FieldData, FieldSchema, Response};
use crate::secrets::duration::format_duration;
use crate::secrets::lease::{extend, LeaseConfig, LeaseLimits, LeaseTerms, LEASE_CONFIG_KEY};
use crate::storage::config_store::{read_lease_config, write_config};
use crate::storage::Storage;

pub const PATTERN: &str = "config/lease";

pub fn fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::duration("ttl", "Default TTL for issued secrets").required(),
        FieldSchema::duration("ttl_max", "Maximum lifetime of a lease including renewals"),
    ]
}

pub async fn write(storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
    let config = LeaseConfig {
        ttl: fields.get_duration("ttl").unwrap_or_default(),
        ttl_max: fields.get_duration("ttl_max").unwrap_or_default(),
    };
    if !config.ttl_max.is_zero() && config.ttl > config.ttl_max {
        return Err(Error::validation_field("ttl cannot exceed ttl_max", "ttl"));
    }
    write_config(storage, LEASE_CONFIG_KEY, &config).await?;
    Ok(None)
}

pub async fn read(storage: &dyn Storage) -> Result<Option<Response>> {
    let Some(config) = read_lease_config(storage).await? else {
        return Ok(None);
    };
    let mut data = Map::new();
    data.insert("ttl".to_string(), Value::from(format_duration(config.ttl)));
    data.insert("ttl_max".to_string(), Value::from(format_duration(config.ttl_max)));
    Ok(Some(Response::with_data(data)))
}

/// Renewal using the backend's stored lease policy.
pub async fn renew(
    storage: &dyn Storage,
    terms: &LeaseTerms,
    limits: &LeaseLimits,
) -> Result<std::time::Duration> {
    let config = read_lease_config(storage).await?;
    extend(terms, config.as_ref(), limits, chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::collections::HashMap;

    fn parse(body: Value) -> Result<FieldData> {
        FieldData::parse(&fields(), body.as_object().unwrap(), &HashMap::new())
    }

    #[tokio::test]
    async fn test_write_then_read_canonical() {
        let storage = MemoryStorage::new();
        write(&storage, &parse(json!({"ttl": "1h5m", "ttl_max": "24h"})).unwrap()).await.unwrap();

        let response = read(&storage).await.unwrap().unwrap();
        assert_eq!(response.data["ttl"], "1h5m0s");
        assert_eq!(response.data["ttl_max"], "24h0m0s");
    }

    #[tokio::test]
    async fn test_read_absent_is_empty() {
        let storage = MemoryStorage::new();
        assert!(read(&storage).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_lease_rejected_before_write() {
        let storage = MemoryStorage::new();
        assert!(parse(json!({"ttl": "forever"})).is_err());
        assert!(parse(json!({})).is_err());

        let err = write(&storage, &parse(json!({"ttl": "2h", "ttl_max": "1h"})).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(storage.is_empty().await);
    }
}
