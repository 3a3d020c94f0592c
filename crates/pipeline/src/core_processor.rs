//! The per-scrap classification protocol. Every plugin processor funnels
//! its scraps through here; the store and search tiers see no writes
//! from anywhere else during processing.

use crate::ProcessOutcome;
use anyhow::Context;
use models::{Scrap, ScrapState};
use scanner::CompiledPatterns;
use search::SearchIndex;
use std::sync::Arc;
use store::Store;

pub struct CoreProcessor {
    store: Store,
    search: SearchIndex,
    // Loaded lazily on first use; reload requires restart.
    patterns: tokio::sync::OnceCell<Arc<CompiledPatterns>>,
}

impl CoreProcessor {
    pub fn new(store: Store, search: SearchIndex) -> Self {
        Self {
            store,
            search,
            patterns: tokio::sync::OnceCell::new(),
        }
    }

    /// Run one scrap through the protocol: insert at PROCESSING, ensure
    /// its hash, scan, branch into a terminal state. Any failure past
    /// the initial insert resolves the row to FAILED; every terminal
    /// transition flows through `update_scrap_state`.
    pub async fn process_scrap(&self, scrap: &Scrap) -> anyhow::Result<ProcessOutcome> {
        let scrap_id = self
            .store
            .save_scrap_reference(scrap, ScrapState::Processing)
            .await
            .context("failed to save scrap reference")?;

        let state = match self.run_protocol(scrap_id, scrap).await {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(scrap_id, ?err, "scrap processing failed");
                self.store
                    .update_scrap_state(scrap_id, ScrapState::Failed)
                    .await
                    .context("failed to mark scrap FAILED")?;
                ScrapState::Failed
            }
        };

        tracing::info!(scrap_id, state = %state, "scrap resolved");
        Ok(ProcessOutcome { scrap_id, state })
    }

    async fn run_protocol(&self, scrap_id: i64, scrap: &Scrap) -> anyhow::Result<ScrapState> {
        // The hash travels with the scrap from collection; recover it
        // from the store if the in-memory copy lost it.
        let hash = match &scrap.hash {
            Some(hash) => hash.clone(),
            None => self
                .store
                .get_scrap_by_id(scrap_id)
                .await?
                .and_then(|row| row.hash)
                .with_context(|| format!("scrap {scrap_id} has no hash"))?,
        };

        let patterns = self.patterns().await?;
        let duplicate = self.store.is_hash_processed(&hash).await?;

        // The scan is CPU-bound; keep it off the coordination scheduler.
        let path = scrap.file_path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            scanner::scan_for_credentials(&path, &patterns, duplicate)
        })
        .await
        .context("scan task panicked")??;

        let state = terminal_state(outcome.is_some(), duplicate);

        if let Some(outcome) = outcome {
            let mut indexed = scrap.clone();
            indexed.id = Some(scrap_id);
            indexed.hash = Some(hash);

            futures::try_join!(
                async {
                    self.store
                        .update_scrap_class(scrap_id, &outcome.class)
                        .await
                        .map_err(anyhow::Error::from)
                },
                async {
                    self.search
                        .save_scrap_chunks(&self.store, &indexed)
                        .await
                        .map_err(anyhow::Error::from)
                },
            )?;
        }

        self.store.update_scrap_state(scrap_id, state).await?;
        Ok(state)
    }

    async fn patterns(&self) -> anyhow::Result<Arc<CompiledPatterns>> {
        let patterns = self
            .patterns
            .get_or_try_init(|| async {
                let rows = self.store.get_classifier_patterns().await?;
                let compiled = scanner::compile_patterns(&rows);
                tracing::info!(
                    loaded = rows.len(),
                    compiled = compiled.len(),
                    "loaded classifier patterns"
                );
                Ok::<_, store::Error>(Arc::new(compiled))
            })
            .await
            .context("failed to load classifier patterns")?;

        Ok(patterns.clone())
    }
}

/// A scan result always wins; an empty scan resolves on the duplicate
/// check alone.
fn terminal_state(outcome_present: bool, duplicate: bool) -> ScrapState {
    match (outcome_present, duplicate) {
        (true, _) => ScrapState::Processed,
        (false, true) => ScrapState::DuplicateExists,
        (false, false) => ScrapState::NoPatternsFound,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn branch_table_matches_the_protocol() {
        assert_eq!(terminal_state(true, false), ScrapState::Processed);
        assert_eq!(terminal_state(true, true), ScrapState::Processed);
        assert_eq!(terminal_state(false, true), ScrapState::DuplicateExists);
        assert_eq!(terminal_state(false, false), ScrapState::NoPatternsFound);
    }

    #[test]
    fn every_branch_lands_in_a_terminal_state() {
        for outcome_present in [true, false] {
            for duplicate in [true, false] {
                assert!(terminal_state(outcome_present, duplicate).is_terminal());
            }
        }
    }
}
