//! Append-only journal of saga events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::events::SagaEvent;

/// Storage for saga events, keyed by the order the saga places.
#[async_trait]
pub trait SagaLog: Send + Sync {
    async fn append(&self, saga_id: OrderId, event: &SagaEvent) -> Result<()>;

    /// Events in the order they were appended. Empty if the saga is unknown.
    async fn load(&self, saga_id: OrderId) -> Result<Vec<SagaEvent>>;
}

/// In-memory saga log. Events are held in their serialized form so that
/// what comes back out went through the same encoding a durable log uses.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaLog {
    streams: Arc<RwLock<HashMap<OrderId, Vec<serde_json::Value>>>>,
}

impl InMemorySagaLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn saga_count(&self) -> usize {
        self.streams.read().await.len()
    }
}

#[async_trait]
impl SagaLog for InMemorySagaLog {
    async fn append(&self, saga_id: OrderId, event: &SagaEvent) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        self.streams
            .write()
            .await
            .entry(saga_id)
            .or_default()
            .push(payload);
        Ok(())
    }

    async fn load(&self, saga_id: OrderId) -> Result<Vec<SagaEvent>> {
        let streams = self.streams.read().await;
        let Some(stream) = streams.get(&saga_id) else {
            return Ok(Vec::new());
        };
        stream
            .iter()
            .map(|payload| serde_json::from_value(payload.clone()).map_err(Into::into))
            .collect()
    }
}
