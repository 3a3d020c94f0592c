//! The scrap lifecycle coordinator: plugin traits, the per-scrap
//! classification protocol, and the two pipeline stages bridging the
//! bus and the shared staging area.

use models::{Scrap, ScrapState};

mod collector;
mod core_processor;
mod inflight;
mod processing;
pub mod staging;

pub use collector::{CollectorStage, CollectorStageConfig};
pub use core_processor::CoreProcessor;
pub use inflight::InFlightSet;
pub use processing::{ProcessingStage, ProcessingStageConfig};

/// Default cap on concurrently running `collect()` calls.
pub const DEFAULT_COLLECTOR_CONCURRENCY: usize = 10;
/// Default cap on concurrently processing scraps.
pub const DEFAULT_PROCESSOR_CONCURRENCY: usize = 100;
/// Consumer batch size of the processing stage.
pub const PROCESSING_BATCH_SIZE: usize = 100;

/// A plugin source of scraps. Each collector is driven by its own
/// long-lived task; `collect()` runs under the collector stage's
/// shared semaphore.
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Source tag stamped onto every scrap this collector emits.
    fn name(&self) -> &str;

    async fn collect(&self) -> anyhow::Result<Vec<Scrap>>;
}

/// A plugin sink for scraps. Every processor whose `can_process`
/// returns true runs, concurrently, for a dispatched scrap.
#[async_trait::async_trait]
pub trait Processor: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn can_process(&self, scrap: &Scrap) -> bool;

    async fn process(&self, scrap: &Scrap) -> anyhow::Result<ProcessOutcome>;
}

/// Where a processed scrap landed: the store-assigned row id and the
/// terminal state it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub scrap_id: i64,
    pub state: ScrapState,
}
