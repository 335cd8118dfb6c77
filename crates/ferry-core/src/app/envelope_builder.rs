//! EnvelopeBuilder - OutboxEntry -> EventEnvelope 変換

use std::sync::Arc;

use crate::domain::{EnvelopeError, EventEnvelope, OutboxEntry};
use crate::ports::{Clock, IdGenerator};

/// 保存済みの entry をバス非依存の envelope に包む
///
/// # フィールド
/// - `id`: 呼び出しごとに新規（entry id ではない）
/// - `type` / `source` / `subject`: event type, aggregate type, aggregate id
/// - `time`: Clock の現在時刻
/// - `data`: 保存された payload を JSON に戻したもの
#[derive(Clone)]
pub struct EnvelopeBuilder {
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl EnvelopeBuilder {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { ids, clock }
    }

    pub fn build(&self, entry: &OutboxEntry) -> Result<EventEnvelope, EnvelopeError> {
        let data = serde_json::from_str(entry.payload()).map_err(|source| {
            EnvelopeError::MalformedPayload {
                id: entry.id(),
                source,
            }
        })?;

        Ok(EventEnvelope {
            id: self.ids.generate_event_id(),
            event_type: entry.event_type().to_string(),
            source: entry.aggregate_type().to_string(),
            subject: entry.aggregate_id().to_string(),
            time: self.clock.now(),
            data,
        })
    }
}
