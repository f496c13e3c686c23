use super::{FieldStore, StoreError};
use crate::flatten::{FieldName, FlattenedField};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FieldFailure {
    pub name: FieldName,
    pub error: StoreError,
}

/// Outcome of persisting one asset's fields.
#[derive(Debug)]
pub struct WriteReport {
    pub owner_id: String,
    pub written: usize,
    pub failures: Vec<FieldFailure>,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Persists flattened fields, one cache entry per field.
#[derive(Clone)]
pub struct CacheWriter {
    store: Arc<dyn FieldStore>,
}

impl CacheWriter {
    pub fn new(store: Arc<dyn FieldStore>) -> Self {
        Self { store }
    }

    /// Write every field of `owner_id` with the same `ttl`.
    ///
    /// Fields are written in order and a failed write never stops the ones
    /// after it. Nothing is retried.
    pub async fn store_all(
        &self,
        owner_id: &str,
        fields: &[FlattenedField],
        ttl: Duration,
    ) -> WriteReport {
        let mut report = WriteReport {
            owner_id: owner_id.to_string(),
            written: 0,
            failures: Vec::new(),
        };

        for field in fields {
            let key = field.key();
            match self.store.set(&key, &field.value.to_string(), ttl).await {
                Ok(()) => report.written += 1,
                Err(error) => {
                    warn!(%key, %error, "cache write failed");
                    report.failures.push(FieldFailure {
                        name: field.name,
                        error,
                    });
                }
            }
        }

        debug!(
            id = owner_id,
            written = report.written,
            failed = report.failures.len(),
            "stored"
        );
        report
    }
}
