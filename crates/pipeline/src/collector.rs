//! The collector stage: drives plugin collectors, stages their files
//! upstream, publishes envelopes onto the scraps topic, and reconciles
//! completions back out of the in-flight set.

use crate::staging::UpstreamStaging;
use crate::{Collector, InFlightSet, DEFAULT_COLLECTOR_CONCURRENCY};
use models::{Scrap, ScrapEnvelope, ScrapState};
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub struct CollectorStageConfig {
    pub scraps_topic: String,
    pub concurrency: usize,
    pub polling_interval: Duration,
}

impl Default for CollectorStageConfig {
    fn default() -> Self {
        Self {
            scraps_topic: bus::DEFAULT_SCRAPS_TOPIC.to_string(),
            concurrency: DEFAULT_COLLECTOR_CONCURRENCY,
            polling_interval: Duration::from_secs(1),
        }
    }
}

pub struct CollectorStage {
    collectors: Vec<Arc<dyn Collector>>,
    store: Store,
    producer: bus::Producer,
    completions: bus::CompletionConsumer,
    staging: UpstreamStaging,
    config: CollectorStageConfig,
    in_flight: InFlightSet,
    semaphore: Arc<Semaphore>,
}

impl CollectorStage {
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        store: Store,
        producer: bus::Producer,
        completions: bus::CompletionConsumer,
        staging: UpstreamStaging,
        config: CollectorStageConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            collectors,
            store,
            producer,
            completions,
            staging,
            config,
            in_flight: InFlightSet::new(),
            semaphore,
        }
    }

    /// Serve until `shutdown` resolves: one long-lived driver task per
    /// collector plus the completion consumer. On shutdown the drivers
    /// finish their current iteration and exit; nothing is hard-killed.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()>) {
        let stage = Arc::new(self);
        let token = CancellationToken::new();

        let mut tasks = Vec::new();
        for collector in stage.collectors.clone() {
            tasks.push(tokio::spawn(drive_collector(
                stage.clone(),
                collector,
                token.clone(),
            )));
        }
        tasks.push(tokio::spawn(consume_completions(
            stage.clone(),
            token.clone(),
        )));

        () = shutdown.await;
        tracing::info!("collector stage signaled to stop and is awaiting drivers");
        token.cancel();
        let _ = futures::future::join_all(tasks).await;

        if let Err(err) = stage.producer.flush(Duration::from_secs(5)) {
            tracing::warn!(?err, "failed to flush scraps producer");
        }
    }

    /// Handle one collected scrap: terminate null hashes, deduplicate
    /// against the in-flight set, stage upstream, publish.
    async fn handle_scrap(&self, mut scrap: Scrap) -> anyhow::Result<()> {
        let Some(hash) = scrap.hash.clone() else {
            tracing::warn!(
                filename = %scrap.filename,
                source = %scrap.source,
                "scrap has no hash, terminating as FAILED"
            );
            self.store
                .save_scrap_reference(&scrap, ScrapState::Failed)
                .await?;
            return Ok(());
        };

        if !self.in_flight.try_admit(&hash) {
            tracing::debug!(%hash, "hash already in flight, skipping");
            return Ok(());
        }

        // From here the hash stays in flight even on error: only the
        // completion consumer (or a restart) releases it.
        let staged = self.staging.stage(&scrap.file_path, &scrap.filename)?;
        scrap.file_path = staged.mounted_path.clone();

        let envelope = ScrapEnvelope::new(&scrap, staged.mounted_path, staged.unc_path)?;
        self.producer
            .publish_scrap(&self.config.scraps_topic, &envelope, &hash)
            .await?;

        tracing::info!(%hash, source = %scrap.source, filename = %scrap.filename, "published scrap");
        Ok(())
    }
}

async fn drive_collector(
    stage: Arc<CollectorStage>,
    collector: Arc<dyn Collector>,
    token: CancellationToken,
) {
    let source = collector.name().to_string();
    tracing::info!(%source, "collector driver started");

    loop {
        let permit = tokio::select! {
            () = token.cancelled() => break,
            permit = stage.semaphore.clone().acquire_owned() => permit.unwrap(),
        };

        match collector.collect().await {
            Ok(scraps) => {
                for scrap in scraps {
                    if let Err(err) = stage.handle_scrap(scrap).await {
                        tracing::error!(%source, ?err, "failed to publish collected scrap");
                    }
                }
            }
            // One bad collector run never kills the driver.
            Err(err) => tracing::error!(%source, ?err, "collector run failed"),
        }
        drop(permit);

        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(stage.config.polling_interval) => {}
        }
    }
    tracing::info!(%source, "collector driver stopped");
}

/// Drain the completion topic, releasing in-flight hashes as their
/// scraps resolve. Notices for unknown hashes are dropped silently.
async fn consume_completions(stage: Arc<CollectorStage>, token: CancellationToken) {
    loop {
        let received = tokio::select! {
            () = token.cancelled() => break,
            received = stage.completions.recv() => received,
        };

        match received {
            Ok(notice) if notice.is_processed() => {
                if stage.in_flight.release(&notice.hash) {
                    tracing::debug!(hash = %notice.hash, scrap_id = notice.scrap_id, "released in-flight hash");
                } else {
                    tracing::debug!(hash = %notice.hash, "completion for unknown hash, dropped");
                }
            }
            Ok(notice) => {
                tracing::debug!(status = %notice.status, "ignoring completion with unexpected status");
            }
            Err(err) => {
                tracing::warn!(?err, "completion consumer error (will retry)");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
