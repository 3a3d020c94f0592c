//! Assembles the dependency graph and runs both stages to completion.
//! Construction order matters: the store connects first, migrations run
//! before anything else touches the schema, and the stages only start
//! once every collaborator is ready.

use crate::config::Config;
use anyhow::Context;
use pipeline::{
    staging::UpstreamStaging, CollectorStage, CollectorStageConfig, CoreProcessor,
    ProcessingStage, ProcessingStageConfig,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tokio_util::sync::CancellationToken;

pub async fn run(config: Config, migrations_dir: &Path) -> anyhow::Result<()> {
    // Pool sized for the full fan-out of both stages.
    let pool_size = (config.collector_concurrency + config.processor_concurrency) as u32;
    let store = Store::connect(config.postgres.connect_options(), pool_size)
        .await
        .context("connecting to postgres")?;

    () = store::migrations::run(store.pool(), migrations_dir)
        .await
        .context("running migrations")?;

    // Rows stuck in PROCESSING belong to a crashed worker; reap them so
    // their files are collected fresh.
    let _reaped = store
        .delete_processing_scraps()
        .await
        .context("reaping stuck scraps")?;

    let es = &config.elasticsearch;
    let search = search::SearchIndex::connect(&es.scheme, &es.host, es.port, &es.user, &es.password)
        .context("configuring elasticsearch client")?;

    let core = Arc::new(CoreProcessor::new(store.clone(), search));
    let plugin_set = plugins::load(&config.local_plugin, &store, &core)
        .context("loading plugins")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("caught shutdown signal, stopping..."),
            Err(err) => tracing::error!(?err, "error subscribing to shutdown signal"),
        }
        signal.cancel();
    });

    for smb in config.smb_servers.iter().filter(|smb| smb.enabled) {
        tracing::info!(
            share = %smb.share,
            mount_point = %smb.mount_point,
            "downstream share configured (mounted externally)"
        );
    }

    let kafka = &config.kafka;
    let mut stages = Vec::new();

    if config.collecting {
        let producer = bus::Producer::connect(&kafka.bootstrap_servers)
            .context("starting scraps producer")?;
        let completions = bus::CompletionConsumer::connect(
            &kafka.bootstrap_servers,
            bus::NOTIFICATION_GROUP,
            &kafka.processed_topic,
        )
        .context("starting completion consumer")?;
        let staging =
            UpstreamStaging::new(&config.upstream_smb.mount_point, &config.upstream_smb.share)
                .context("preparing upstream staging")?;

        let stage = CollectorStage::new(
            plugin_set.collectors,
            store.clone(),
            producer,
            completions,
            staging,
            CollectorStageConfig {
                scraps_topic: kafka.topic.clone(),
                concurrency: config.collector_concurrency,
                polling_interval: Duration::from_secs(config.polling_interval),
            },
        );
        tracing::info!("collector stage enabled");
        stages.push(tokio::spawn(stage.serve(shutdown.clone().cancelled_owned())));
    }

    if config.processing {
        let consumer = bus::BatchConsumer::connect(
            &kafka.bootstrap_servers,
            bus::PROCESSING_GROUP,
            &kafka.topic,
        )
        .context("starting scraps consumer")?;
        let producer = bus::Producer::connect(&kafka.bootstrap_servers)
            .context("starting completion producer")?;

        let stage = ProcessingStage::new(
            plugin_set.processors,
            store.clone(),
            consumer,
            producer,
            ProcessingStageConfig {
                completion_topic: kafka.processed_topic.clone(),
                concurrency: config.processor_concurrency,
                ..Default::default()
            },
        );
        tracing::info!("processing stage enabled");
        stages.push(tokio::spawn(stage.serve(shutdown.clone().cancelled_owned())));
    }

    anyhow::ensure!(
        !stages.is_empty(),
        "both collecting and processing are disabled; nothing to run"
    );

    for stage in futures::future::join_all(stages).await {
        stage.context("stage task panicked")?;
    }

    store.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}
