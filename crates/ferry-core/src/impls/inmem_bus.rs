//! InMemoryBus - a recording bus for development and tests.
//!
//! Messages are assigned to a partition by hashing the partition key, and get
//! a per-partition offset, which is enough to check per-aggregate ordering.
//! Failures can be scripted per call, per key, or for every call.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{EventEnvelope, PublishError};
use crate::ports::{MessageBus, PublishAck};

/// One accepted message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub partition_key: String,
    pub partition: u32,
    pub offset: u64,
    pub envelope: EventEnvelope,
}

/// Scripted behaviour for an upcoming publish call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Fail(PublishError),
    /// Never resolve; the caller's timeout has to fire.
    Hang,
}

#[derive(Default)]
struct BusState {
    published: Vec<PublishedMessage>,
    next_offsets: HashMap<u32, u64>,
    script: VecDeque<Scripted>,
    failing_keys: HashMap<String, PublishError>,
    fail_always: Option<PublishError>,
    latency: Option<Duration>,
    attempts: usize,
}

#[derive(Clone)]
pub struct InMemoryBus {
    partitions: u32,
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Arc::new(Mutex::new(BusState::default())),
        }
    }

    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partitions)) as u32
    }

    /// Queue a behaviour for the next call (FIFO).
    pub async fn script(&self, step: Scripted) {
        self.state.lock().await.script.push_back(step);
    }

    pub async fn fail_next(&self, err: PublishError) {
        self.script(Scripted::Fail(err)).await;
    }

    pub async fn hang_next(&self) {
        self.script(Scripted::Hang).await;
    }

    /// Every publish for `key` fails with `err`.
    pub async fn fail_key(&self, key: impl Into<String>, err: PublishError) {
        self.state.lock().await.failing_keys.insert(key.into(), err);
    }

    /// Every publish fails with `err` (or stops failing with `None`).
    pub async fn fail_always(&self, err: Option<PublishError>) {
        self.state.lock().await.fail_always = err;
    }

    /// Every successful publish takes `latency` before it is acknowledged.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = Some(latency);
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.published.clone()
    }

    /// Publish calls seen so far, successful or not.
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<PublishAck, PublishError> {
        let (step, latency) = {
            let mut state = self.state.lock().await;
            state.attempts += 1;
            if let Some(err) = &state.fail_always {
                return Err(err.clone());
            }
            if let Some(err) = state.failing_keys.get(partition_key) {
                return Err(err.clone());
            }
            (state.script.pop_front(), state.latency)
        };

        match step {
            Some(Scripted::Fail(err)) => return Err(err),
            Some(Scripted::Hang) => std::future::pending::<()>().await,
            None => {}
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let partition = self.partition_for(partition_key);
        let mut state = self.state.lock().await;
        let next = state.next_offsets.entry(partition).or_insert(0);
        let offset = *next;
        *next += 1;
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            partition_key: partition_key.to_string(),
            partition,
            offset,
            envelope: envelope.clone(),
        });

        Ok(PublishAck {
            partition: Some(partition),
            offset: Some(offset),
        })
    }
}
