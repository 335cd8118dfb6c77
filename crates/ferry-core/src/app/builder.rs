//! OutboxBuilder - 1 つの store 上に capture と relay を組み立てる
//!
//! # Fail-fast
//! store と bus は必須。足りなければ `build()` が不足分を返す
//! （配送できない relay は起動しない）。

use std::sync::Arc;

use crate::app::capture::EventCapture;
use crate::app::publisher_loop::PublisherLoop;
use crate::app::status::OutboxStatus;
use crate::config::RelayConfig;
use crate::domain::StoreError;
use crate::observability::OutboxMetrics;
use crate::ports::{Clock, IdGenerator, MessageBus, OutboxStore, SystemClock, UlidGenerator};

/// ```rust,ignore
/// let outbox = OutboxBuilder::new()
///     .store(Arc::new(store))
///     .bus(Arc::new(bus))
///     .config(RelayConfig::default())
///     .build()?;
/// outbox.capture().save_event::<(), _>("User", id, "CREATED", None, Some(&user)).await;
/// let handle = outbox.relay().spawn();
/// ```
#[derive(Default)]
pub struct OutboxBuilder {
    store: Option<Arc<dyn OutboxStore>>,
    bus: Option<Arc<dyn MessageBus>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: RelayConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing components: {0:?}")]
    Missing(Vec<&'static str>),
}

impl OutboxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn OutboxStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a `UlidGenerator` over the configured clock.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Outbox, BuildError> {
        let (store, bus) = match (self.store, self.bus) {
            (Some(store), Some(bus)) => (store, bus),
            (store, bus) => {
                let mut missing = Vec::new();
                if store.is_none() {
                    missing.push("store");
                }
                if bus.is_none() {
                    missing.push("bus");
                }
                return Err(BuildError::Missing(missing));
            }
        };

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let metrics = Arc::new(OutboxMetrics::new());

        let capture = EventCapture::new(store.clone(), ids.clone(), clock.clone(), metrics.clone());
        let relay = Arc::new(PublisherLoop::new(
            self.config,
            store.clone(),
            bus,
            ids,
            clock,
            metrics.clone(),
        ));

        Ok(Outbox {
            store,
            capture,
            relay,
            metrics,
        })
    }
}

/// capture API と唯一の relay（store と metrics を共有）
pub struct Outbox {
    store: Arc<dyn OutboxStore>,
    capture: EventCapture,
    relay: Arc<PublisherLoop>,
    metrics: Arc<OutboxMetrics>,
}

impl Outbox {
    pub fn capture(&self) -> &EventCapture {
        &self.capture
    }

    pub fn relay(&self) -> Arc<PublisherLoop> {
        Arc::clone(&self.relay)
    }

    pub fn metrics(&self) -> &OutboxMetrics {
        &self.metrics
    }

    /// Current counters plus a look at the dead-letter backlog.
    pub async fn status(&self, dead_letter_limit: usize) -> Result<OutboxStatus, StoreError> {
        let max_retries = self.relay.config().max_retries();
        let pending = self.store.count_pending(max_retries).await?;
        let dead_letters = self.store.dead_letters(dead_letter_limit).await?;
        Ok(OutboxStatus {
            pending,
            dead_letters,
            metrics: self.metrics.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PublishError;
    use crate::impls::{InMemoryBus, InMemoryOutboxStore};

    #[test]
    fn build_requires_store_and_bus() {
        let err = OutboxBuilder::new().build().err().unwrap();
        assert!(matches!(err, BuildError::Missing(m) if m == vec!["store", "bus"]));

        let err = OutboxBuilder::new()
            .store(Arc::new(InMemoryOutboxStore::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Missing(m) if m == vec!["bus"]));
    }

    #[tokio::test]
    async fn capture_and_relay_share_store_and_metrics() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryBus::default();
        let outbox = OutboxBuilder::new()
            .store(Arc::new(store.clone()))
            .bus(Arc::new(bus.clone()))
            .config(RelayConfig::builder().max_retries(1).build().unwrap())
            .build()
            .unwrap();

        outbox
            .capture()
            .save_event::<(), _>("User", "u-1", "CREATED", None, Some(serde_json::json!({"name": "A"})))
            .await
            .unwrap();
        outbox
            .capture()
            .save_event::<(), ()>("User", "u-2", "CREATED", None, None)
            .await
            .unwrap();
        bus.fail_key("u-2", PublishError::Network("down".into())).await;

        outbox.relay().tick().await.unwrap();

        let status = outbox.status(10).await.unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.dead_letters.len(), 1);
        assert_eq!(status.dead_letters[0].aggregate_id().as_str(), "u-2");
        assert_eq!(status.metrics.created, 2);
        assert_eq!(status.metrics.relayed, 1);
        assert_eq!(status.metrics.dead_lettered, 1);
        assert_eq!(store.len().await, 1);
    }
}
