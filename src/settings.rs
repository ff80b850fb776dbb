//! Small persisted settings backed by the `config` collection.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::StoreError;
use crate::models::ConfigEntry;
use crate::store::LocalStore;

/// Running counter behind the display order number.
pub const ORDER_COUNTER_KEY: &str = "orders.counter";
/// RFC 3339 time of the last sync cycle that finished without failures.
pub const LAST_SYNC_SUCCESS_KEY: &str = "sync.last_success_at";

pub async fn get_config(store: &LocalStore, key: &str) -> Result<Option<Value>, StoreError> {
    let entry: Option<ConfigEntry> = store.get(key).await?;
    Ok(entry.map(|e| e.value))
}

/// Typed read. A stored value of the wrong shape reads as absent.
pub async fn get_config_as<T: DeserializeOwned>(
    store: &LocalStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(value) = get_config(store, key).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            warn!(key, error = %e, "Ignoring config value with unexpected shape");
            Ok(None)
        }
    }
}

pub async fn set_config<T: Serialize>(
    store: &LocalStore,
    key: &str,
    value: T,
) -> Result<(), StoreError> {
    let entry = ConfigEntry {
        key: key.to_string(),
        value: serde_json::to_value(value)?,
        updated_at: Utc::now(),
    };
    store.update(entry).await
}

/// Bump the counter stored under `key` in one transaction and return the
/// new value. A missing or non-numeric value counts from zero.
pub async fn increment_counter(store: &LocalStore, key: &str) -> Result<u64, StoreError> {
    let entry_key = key.to_string();
    store
        .upsert_with::<ConfigEntry, _, StoreError, _>(key, move |current| {
            let next = current.and_then(|e| e.value.as_u64()).unwrap_or(0) + 1;
            let entry = ConfigEntry {
                key: entry_key,
                value: Value::from(next),
                updated_at: Utc::now(),
            };
            Ok((entry, next))
        })
        .await
}
