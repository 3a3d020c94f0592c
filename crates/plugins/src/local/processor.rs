use super::{LocalService, SOURCE};
use models::Scrap;
use pipeline::{CoreProcessor, ProcessOutcome, Processor};
use std::sync::Arc;

/// Processes local scraps through the core protocol, then parks the
/// staged file in the processed directory on this host's view.
pub struct LocalProcessor {
    service: Arc<LocalService>,
    core: Arc<CoreProcessor>,
}

impl LocalProcessor {
    pub fn new(service: Arc<LocalService>, core: Arc<CoreProcessor>) -> Self {
        Self { service, core }
    }
}

#[async_trait::async_trait]
impl Processor for LocalProcessor {
    fn name(&self) -> &str {
        SOURCE
    }

    fn can_process(&self, scrap: &Scrap) -> bool {
        scrap.source == SOURCE
    }

    async fn process(&self, scrap: &Scrap) -> anyhow::Result<ProcessOutcome> {
        let outcome = self.core.process_scrap(scrap).await?;

        // The move clears the upstream share; failing to move never
        // un-resolves an already terminal scrap.
        let service = self.service.clone();
        let file_path = scrap.file_path.clone();
        let moved =
            tokio::task::spawn_blocking(move || service.move_file_to_processed(&file_path)).await?;
        if let Err(err) = moved {
            tracing::error!(file_path = %scrap.file_path, ?err, "failed to move processed file");
        }

        Ok(outcome)
    }
}
