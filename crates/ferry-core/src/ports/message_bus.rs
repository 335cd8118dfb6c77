//! MessageBus port - 外部バスのクライアント
//!
//! 配送手段（実ブローカー、ログ出力のみ、テスト用レコーダ）はすべてこの
//! trait の実装。relay は store ごとに 1 つだけで、手段ごとに別の
//! スケジューラを持たない。

use async_trait::async_trait;

use crate::domain::{EventEnvelope, PublishError};

/// What the bus reports back for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishAck {
    /// Partition the message landed on, if the bus partitions.
    pub partition: Option<u32>,
    /// Offset within the partition, if the bus exposes one.
    pub offset: Option<u64>,
}

/// バスクライアント
///
/// # 契約
/// - `publish` はバスがメッセージを受理した時点で resolve する
/// - relay は `Ok` を配送済みとみなして行を削除するので、ブローカー実装は
///   ack を受けてから resolve すること
/// - 同じ `partition_key` のメッセージは相対順序を保つこと
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<PublishAck, PublishError>;
}
