//! Plugin registry. Plugins are compiled in and registered statically,
//! one entry per plugin, each gated by its config's enable flag and
//! handed the concrete collaborators it needs.

use pipeline::{Collector, CoreProcessor, Processor};
use std::sync::Arc;
use store::Store;

pub mod local;

/// The collectors and processors contributed by every enabled plugin.
#[derive(Default)]
pub struct PluginSet {
    pub collectors: Vec<Arc<dyn Collector>>,
    pub processors: Vec<Arc<dyn Processor>>,
}

/// Build the plugin set. A plugin that fails to construct aborts
/// startup; a disabled plugin contributes nothing.
pub fn load(
    local: &local::LocalPluginConfig,
    store: &Store,
    core: &Arc<CoreProcessor>,
) -> anyhow::Result<PluginSet> {
    let mut set = PluginSet::default();

    if local.enabled {
        let service = Arc::new(local::LocalService::new(
            &local.watch_directory,
            &local.processed_directory,
        )?);
        set.collectors.push(Arc::new(local::LocalCollector::new(
            service.clone(),
            store.clone(),
        )));
        set.processors
            .push(Arc::new(local::LocalProcessor::new(service, core.clone())));
        tracing::info!(watch_directory = %local.watch_directory, "local plugin enabled");
    } else {
        tracing::info!("local plugin disabled, skipping");
    }

    Ok(set)
}
