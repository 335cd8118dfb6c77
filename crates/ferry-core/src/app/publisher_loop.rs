//! PublisherLoop - outbox の entry をメッセージバスへ配送
//!
//! # 1 tick のフロー
//! 1. `retry_count >= max_retries` なのに dead-letter されていない行を
//!    dead-letter にする（中断された tick や `max_retries` の引き下げの後始末）
//! 2. 選択可能な entry を古い順に最大 `batch_size` 件 claim
//! 3. 各 entry: envelope を作り、
//!    `topic_prefix + lower(aggregate_type) + "." + lower(event_type)` へ
//!    aggregate id をキーに publish（`publish_timeout` で打ち切り）。
//!    `tick_budget` の残りに `publish_timeout` が丸ごと収まる間だけ試行する
//!    （tick の最初の 1 件は必ず試行）。残りは release
//! 4. 全試行が終わってから bookkeeping:
//!    - 失敗した id のうち *加算前* の count が `max_retries - 1` 以上のものを dead-letter
//!    - 失敗した id の `retry_count` を加算
//!    - 配送済みの id を削除
//!    - 試行しなかった id を release
//!
//!    dead-letter を先に行うので、途中で store が落ちても行は
//!    「pending のまま（claim 期限切れ後に再試行）」か「dead-letter 済み」のどちらか。
//!
//! # 配送セマンティクス
//! At-least-once。バスからの `Ok`（await 済み = ack 済み）を配送済みとみなす。
//! publish と削除の間のクラッシュや claim の期限切れでは再 publish される。
//! 重複排除は consumer 側の責務。
//!
//! 1 件の失敗でバッチは止まらない。store の失敗は tick を中断し、
//! 次の tick でやり直す（古い claim は `claim_ttl` 後に失効）。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::app::envelope_builder::EnvelopeBuilder;
use crate::config::RelayConfig;
use crate::domain::{
    EntryId, EnvelopeError, ErrorKind, OutboxEntry, PublishError, RelayError, RelayId, topic_for,
};
use crate::observability::OutboxMetrics;
use crate::ports::{Claim, Clock, IdGenerator, MessageBus, OutboxStore, PublishAck};

/// Why a single entry was not delivered.
#[derive(Debug, Error)]
enum DeliveryError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl DeliveryError {
    fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::Envelope(e) => e.kind(),
            DeliveryError::Publish(e) => e.kind(),
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub selected: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// Claimed but not attempted (tick budget exhausted).
    pub released: usize,
}

#[derive(Default)]
struct Dispositions {
    delivered: Vec<EntryId>,
    failed: Vec<EntryId>,
    dead_letter: Vec<EntryId>,
    unattempted: Vec<EntryId>,
}

pub struct PublisherLoop {
    relay_id: RelayId,
    config: RelayConfig,
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    envelopes: EnvelopeBuilder,
    clock: Arc<dyn Clock>,
    metrics: Arc<OutboxMetrics>,
}

impl PublisherLoop {
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn MessageBus>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<OutboxMetrics>,
    ) -> Self {
        Self {
            relay_id: ids.generate_relay_id(),
            config,
            store,
            bus,
            envelopes: EnvelopeBuilder::new(ids, clock.clone()),
            clock,
            metrics,
        }
    }

    pub fn relay_id(&self) -> RelayId {
        self.relay_id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// claim → publish → bookkeeping を 1 回実行
    #[instrument(skip(self), fields(relay_id = %self.relay_id))]
    pub async fn tick(&self) -> Result<TickReport, RelayError> {
        let now = self.clock.now();
        let claim = Claim::new(self.relay_id, now + self.config.claim_lease());

        let swept = self.sweep_exhausted().await?;

        let batch = self
            .store
            .claim_batch(self.config.batch_size(), self.config.max_retries(), claim, now)
            .await?;

        let deadline = Instant::now() + self.config.tick_budget();
        let publish_timeout = self.config.publish_timeout();
        let mut d = Dispositions::default();
        let mut attempted = false;

        for entry in &batch {
            if attempted && Instant::now() + publish_timeout > deadline {
                d.unattempted.push(entry.id());
                continue;
            }
            attempted = true;
            match self.deliver(entry).await {
                Ok(ack) => {
                    debug!(
                        entry_id = %entry.id(),
                        partition = ?ack.partition,
                        offset = ?ack.offset,
                        "entry delivered"
                    );
                    d.delivered.push(entry.id());
                }
                Err(err) => {
                    let exhausted =
                        entry.retry_count().saturating_add(1) >= self.config.max_retries();
                    let give_up = exhausted
                        || (self.config.dead_letter_permanent_failures()
                            && err.kind() == ErrorKind::Permanent);
                    warn!(
                        entry_id = %entry.id(),
                        retry_count = entry.retry_count(),
                        dead_letter = give_up,
                        error = %err,
                        "publish attempt failed"
                    );
                    d.failed.push(entry.id());
                    if give_up {
                        d.dead_letter.push(entry.id());
                    }
                }
            }
        }

        let mut report = self.apply(batch.len(), d).await?;
        report.dead_lettered += swept;
        self.refresh_pending().await?;

        if report.selected > 0 {
            info!(
                selected = report.selected,
                delivered = report.delivered,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                released = report.released,
                "relay tick finished"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<PublishAck, DeliveryError> {
        let envelope = self.envelopes.build(entry)?;
        let topic = topic_for(self.config.topic_prefix(), entry);
        let limit = self.config.publish_timeout();

        match tokio::time::timeout(
            limit,
            self.bus.publish(&topic, entry.aggregate_id().as_str(), &envelope),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(PublishError::Timeout(limit).into()),
        }
    }

    /// 選択されることはもうないのに dead-letter されていない行を回収
    async fn sweep_exhausted(&self) -> Result<usize, RelayError> {
        let ids = self
            .store
            .dead_letter_exhausted(self.config.max_retries())
            .await?;
        if !ids.is_empty() {
            self.metrics.dead_lettered(ids.len() as u64);
            for id in &ids {
                warn!(entry_id = %id, "exhausted entry dead-lettered");
            }
        }
        Ok(ids.len())
    }

    async fn apply(&self, selected: usize, d: Dispositions) -> Result<TickReport, RelayError> {
        if !d.dead_letter.is_empty() {
            self.store.mark_dead_letter_by_ids(&d.dead_letter).await?;
            self.metrics.dead_lettered(d.dead_letter.len() as u64);
            for id in &d.dead_letter {
                warn!(entry_id = %id, "entry dead-lettered");
            }
        }
        if !d.failed.is_empty() {
            self.store.increment_retry_by_ids(&d.failed).await?;
            self.metrics.failed(d.failed.len() as u64);
        }
        if !d.delivered.is_empty() {
            self.store.delete_by_ids(&d.delivered).await?;
            self.metrics.relayed(d.delivered.len() as u64);
        }
        if !d.unattempted.is_empty() {
            self.store.release_by_ids(&d.unattempted).await?;
        }

        Ok(TickReport {
            selected,
            delivered: d.delivered.len(),
            failed: d.failed.len(),
            dead_lettered: d.dead_letter.len(),
            released: d.unattempted.len(),
        })
    }

    async fn refresh_pending(&self) -> Result<(), RelayError> {
        let pending = self.store.count_pending(self.config.max_retries()).await?;
        self.metrics.set_pending(pending as u64);
        Ok(())
    }

    /// shutdown が要求されるまで `poll_interval` ごとに tick を回す
    pub fn spawn(self: Arc<Self>) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        RelayHandle { shutdown_tx, join }
    }

    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(relay_id = %self.relay_id, "relay started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // Sender dropped: nobody can stop us any more, so stop now.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }
            if let Err(err) = self.tick().await {
                error!(relay_id = %self.relay_id, error = %err, "relay tick aborted");
            }
        }

        info!(relay_id = %self.relay_id, "relay stopped");
    }
}

/// Handle to a spawned relay.
/// Dropping it also stops the relay after the tick in progress.
pub struct RelayHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    /// Ask the relay to stop after the tick in progress.
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}
