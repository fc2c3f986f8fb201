//! Persistence port for ingested series.
//!
//! The record store itself belongs to the embedding application; the pipeline
//! only hands it finished [`SeriesRecord`]s.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::SeriesRecord;

/// Sink for series records produced by ingestion.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Persists `series`, replacing any previous record with the same sanitized name.
    async fn save_series(&self, series: &SeriesRecord) -> Result<()>;
}

/// In-memory [`SeriesStore`], keyed by sanitized series name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: Mutex<HashMap<String, SeriesRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, sanitized_name: &str) -> Option<SeriesRecord> {
        self.series.lock().await.get(sanitized_name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.series.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.series.lock().await.is_empty()
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    async fn save_series(&self, series: &SeriesRecord) -> Result<()> {
        self.series
            .lock()
            .await
            .insert(series.sanitized_name.clone(), series.clone());
        Ok(())
    }
}
