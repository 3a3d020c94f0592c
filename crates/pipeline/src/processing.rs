//! The processing stage: consumes scrap envelopes in batches, fans each
//! scrap out to its applicable processors under a bounded semaphore, and
//! commits offsets only once a batch has fully resolved.

use crate::{InFlightSet, Processor, ProcessOutcome, DEFAULT_PROCESSOR_CONCURRENCY, PROCESSING_BATCH_SIZE};
use bus::MessageAt;
use futures::stream::{FuturesUnordered, StreamExt};
use models::{CompletionNotice, Scrap, ScrapEnvelope};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tokio::sync::Semaphore;

pub struct ProcessingStageConfig {
    pub completion_topic: String,
    pub concurrency: usize,
    pub batch_size: usize,
    pub poll_timeout: Duration,
}

impl Default for ProcessingStageConfig {
    fn default() -> Self {
        Self {
            completion_topic: bus::DEFAULT_COMPLETION_TOPIC.to_string(),
            concurrency: DEFAULT_PROCESSOR_CONCURRENCY,
            batch_size: PROCESSING_BATCH_SIZE,
            poll_timeout: Duration::from_secs(1),
        }
    }
}

pub struct ProcessingStage {
    processors: Vec<Arc<dyn Processor>>,
    store: Store,
    consumer: bus::BatchConsumer,
    producer: bus::Producer,
    config: ProcessingStageConfig,
    in_flight: InFlightSet,
    semaphore: Arc<Semaphore>,
}

impl ProcessingStage {
    pub fn new(
        processors: Vec<Arc<dyn Processor>>,
        store: Store,
        consumer: bus::BatchConsumer,
        producer: bus::Producer,
        config: ProcessingStageConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            processors,
            store,
            consumer,
            producer,
            config,
            in_flight: InFlightSet::new(),
            semaphore,
        }
    }

    /// Serve until `shutdown` resolves. A batch in progress always runs
    /// to completion (and commits) before the stage exits.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()>) {
        let stage = Arc::new(self);
        stage.clone().replay_unprocessed().await;
        tokio::pin!(shutdown);

        loop {
            let polled = tokio::select! {
                () = &mut shutdown => break,
                polled = stage
                    .consumer
                    .poll_batch(stage.config.batch_size, stage.config.poll_timeout) => polled,
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(?err, "failed to poll scraps topic (will retry)");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }
            stage.clone().run_batch(batch).await;
        }

        if let Err(err) = stage.producer.flush(Duration::from_secs(5)) {
            tracing::warn!(?err, "failed to flush completion producer");
        }
        tracing::info!("processing stage stopped");
    }

    /// Re-dispatch rows left behind by legacy ingestors before touching
    /// the bus. Stuck PROCESSING rows were reaped at startup, so this
    /// picks up NEW rows only.
    async fn replay_unprocessed(self: Arc<Self>) {
        let scraps = match self.store.get_unprocessed_scraps().await {
            Ok(scraps) => scraps,
            Err(err) => {
                tracing::error!(?err, "failed to fetch unprocessed scraps for replay");
                return;
            }
        };
        if scraps.is_empty() {
            return;
        }
        tracing::info!(count = scraps.len(), "replaying unprocessed scraps");

        let mut tasks = FuturesUnordered::new();
        for scrap in scraps {
            let Some(hash) = scrap.hash.clone() else {
                tracing::warn!(id = ?scrap.id, "skipping unprocessed scrap without hash");
                continue;
            };
            if !self.in_flight.try_admit(&hash) {
                continue;
            }
            let stage = self.clone();
            tasks.push(async move { stage.process_with_semaphore(scrap, hash).await });
        }
        while tasks.next().await.is_some() {}
    }

    async fn run_batch(self: Arc<Self>, batch: bus::Batch) {
        // Corrupt messages are committed past, never retried.
        let mut handled: Vec<MessageAt> = batch.dropped;
        let mut skipped: Vec<MessageAt> = Vec::new();
        let mut tasks = FuturesUnordered::new();

        for bus::Delivery { envelope, at } in batch.deliveries {
            let scrap = match rehydrate(&envelope) {
                Ok(scrap) => scrap,
                Err(err) => {
                    tracing::warn!(?err, "dropping envelope with undecodable scrap");
                    handled.push(at);
                    continue;
                }
            };
            // A published scrap always carries its hash; anything else
            // is a corrupt message.
            let Some(hash) = scrap.hash.clone() else {
                tracing::warn!(filename = %scrap.filename, "dropping scrap without hash");
                handled.push(at);
                continue;
            };

            if !self.in_flight.try_admit(&hash) {
                tracing::info!(%hash, "hash already processing, skipping without commit");
                skipped.push(at);
                continue;
            }

            let stage = self.clone();
            tasks.push(async move {
                stage.process_with_semaphore(scrap, hash).await;
                at
            });
        }

        // Offsets only advance once every future of the batch resolves.
        while let Some(at) = tasks.next().await {
            handled.push(at);
        }

        let positions = commit_positions(&handled, &skipped);
        if let Err(err) = self.consumer.commit_positions(&positions) {
            tracing::error!(?err, "failed to commit offsets (replay is absorbed by the duplicate check)");
        }
    }

    /// Run every applicable processor for one scrap, emit the advisory
    /// completion notice, and release the hash from the stage's own
    /// in-flight set.
    async fn process_with_semaphore(&self, scrap: Scrap, hash: String) {
        let _permit = self.semaphore.clone().acquire_owned().await.unwrap();

        let applicable: Vec<Arc<dyn Processor>> = self
            .processors
            .iter()
            .filter(|processor| processor.can_process(&scrap))
            .cloned()
            .collect();

        if applicable.is_empty() {
            tracing::warn!(source = %scrap.source, %hash, "no processor accepts this scrap");
            self.in_flight.release(&hash);
            return;
        }

        let scrap = &scrap;
        let mut outcomes: FuturesUnordered<_> = applicable
            .iter()
            .map(|processor| async move {
                (processor.name().to_string(), processor.process(scrap).await)
            })
            .collect();

        let mut resolved: Option<ProcessOutcome> = None;
        while let Some((name, result)) = outcomes.next().await {
            match result {
                Ok(outcome) => {
                    tracing::info!(processor = %name, scrap_id = outcome.scrap_id, state = %outcome.state, "processor finished");
                    resolved.get_or_insert(outcome);
                }
                // A failed processor never takes the stage down; the
                // offset still advances and replay is duplicate-safe.
                Err(err) => tracing::error!(processor = %name, %hash, ?err, "processor failed"),
            }
        }

        if let Some(outcome) = resolved {
            let notice = CompletionNotice::processed(outcome.scrap_id, hash.clone());
            if let Err(err) = self
                .producer
                .publish_completion(&self.config.completion_topic, &notice)
                .await
            {
                // Advisory channel: the collector-side entry leaks until
                // restart, with no functional impact.
                tracing::warn!(%hash, ?err, "failed to publish completion notice");
            }
        }

        self.in_flight.release(&hash);
    }
}

/// Rehydrate the embedded scrap and point it at the platform-correct
/// view of the staged file.
fn rehydrate(envelope: &ScrapEnvelope) -> serde_json::Result<Scrap> {
    let mut scrap = envelope.scrap()?;
    scrap.file_path =
        select_path(&envelope.mounted_path, &envelope.unc_path, cfg!(windows)).to_string();
    Ok(scrap)
}

fn select_path<'a>(mounted_path: &'a str, unc_path: &'a str, windows: bool) -> &'a str {
    if windows {
        unc_path
    } else {
        mounted_path
    }
}

/// Compute next-to-read commit positions for a finished batch.
///
/// Handled messages (processed or dropped-as-corrupt) advance their
/// partition to one past the highest handled offset. A skipped message
/// caps its partition below the skip, so the skipped scrap is
/// redelivered once its earlier attempt is out of the way.
fn commit_positions(handled: &[MessageAt], skipped: &[MessageAt]) -> HashMap<(String, i32), i64> {
    let mut positions: HashMap<(String, i32), i64> = HashMap::new();

    for at in handled {
        let position = positions
            .entry((at.topic.clone(), at.partition))
            .or_insert(at.offset + 1);
        *position = (*position).max(at.offset + 1);
    }
    for at in skipped {
        if let Some(position) = positions.get_mut(&(at.topic.clone(), at.partition)) {
            *position = (*position).min(at.offset);
        }
    }
    positions.retain(|_, position| *position > 0);
    positions
}

#[cfg(test)]
mod test {
    use super::*;
    use models::ScrapState;

    fn at(partition: i32, offset: i64) -> MessageAt {
        MessageAt {
            topic: "scraps".to_string(),
            partition,
            offset,
        }
    }

    #[test]
    fn processors_read_the_platform_correct_path() {
        assert_eq!(select_path("/mnt/u/f", r"\\srv\s\f", false), "/mnt/u/f");
        assert_eq!(select_path("/mnt/u/f", r"\\srv\s\f", true), r"\\srv\s\f");
    }

    #[test]
    fn rehydration_restores_the_scrap_and_its_staged_path() {
        let scrap = Scrap {
            id: None,
            hash: Some("d".repeat(64)),
            source: "local".to_string(),
            filename: "f".to_string(),
            file_path: "/collector/view/f".to_string(),
            state: ScrapState::Processing,
            timestamp: None,
            occurrence_time: None,
            class: None,
        };
        let envelope = ScrapEnvelope::new(
            &scrap,
            "/mnt/upstream_scraps/f".to_string(),
            r"\\srv\scraps\f".to_string(),
        )
        .unwrap();

        let rehydrated = rehydrate(&envelope).unwrap();
        assert_eq!(rehydrated.hash, scrap.hash);
        #[cfg(not(windows))]
        assert_eq!(rehydrated.file_path, "/mnt/upstream_scraps/f");
    }

    #[test]
    fn handled_offsets_commit_one_past_the_highest() {
        let positions = commit_positions(&[at(0, 3), at(0, 5), at(1, 2)], &[]);
        assert_eq!(positions[&("scraps".to_string(), 0)], 6);
        assert_eq!(positions[&("scraps".to_string(), 1)], 3);
    }

    #[test]
    fn a_skipped_message_caps_its_partition() {
        // Offsets 3 and 6 resolved, 5 was skipped as already in flight:
        // the partition must not commit past 5.
        let positions = commit_positions(&[at(0, 3), at(0, 6)], &[at(0, 5)]);
        assert_eq!(positions[&("scraps".to_string(), 0)], 5);
    }

    #[test]
    fn a_partition_with_only_skips_commits_nothing() {
        let positions = commit_positions(&[at(1, 9)], &[at(0, 4)]);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[&("scraps".to_string(), 1)], 10);
    }

    #[test]
    fn a_skip_at_the_batch_head_holds_the_partition_back() {
        let positions = commit_positions(&[at(0, 1)], &[at(0, 0)]);
        assert!(positions.is_empty());
    }
}
