use super::{LocalService, ScrapeFile, SOURCE};
use chrono::{DateTime, Utc};
use models::{Scrap, ScrapState};
use pipeline::Collector;
use std::collections::HashSet;
use std::sync::Arc;
use store::Store;

/// Collects scraps from the watched local directory. Each found file is
/// hashed up front; files whose filename is already mid-flight in
/// another process are left alone for that process to finish.
pub struct LocalCollector {
    service: Arc<LocalService>,
    store: Store,
}

impl LocalCollector {
    pub fn new(service: Arc<LocalService>, store: Store) -> Self {
        Self { service, store }
    }
}

#[async_trait::async_trait]
impl Collector for LocalCollector {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn collect(&self) -> anyhow::Result<Vec<Scrap>> {
        let service = self.service.clone();
        let files = tokio::task::spawn_blocking(move || service.fetch_scrape_files()).await??;
        if files.is_empty() {
            tracing::debug!("no new files to collect");
            return Ok(Vec::new());
        }

        let mid_flight: HashSet<String> = self
            .store
            .get_processing_filenames()
            .await?
            .into_iter()
            .collect();

        let mut scraps = Vec::new();
        for file in files {
            if mid_flight.contains(&file.filename) {
                tracing::debug!(filename = %file.filename, "file already mid-flight, skipping");
                continue;
            }

            // Per-file failures skip the file, never the whole run.
            match self.collect_one(file).await {
                Ok(scrap) => scraps.push(scrap),
                Err(err) => tracing::error!(?err, "failed to collect file"),
            }
        }
        Ok(scraps)
    }
}

impl LocalCollector {
    async fn collect_one(&self, mut file: ScrapeFile) -> anyhow::Result<Scrap> {
        if file.file_path.extension().and_then(|ext| ext.to_str()) == Some("zst") {
            let service = self.service.clone();
            file = tokio::task::spawn_blocking(move || service.expand_compressed(&file)).await??;
        }

        let path = file.file_path.clone();
        let hash = tokio::task::spawn_blocking(move || scanner::calculate_file_hash(path)).await??;

        let (timestamp, occurrence_time) = file_times(&file);

        Ok(Scrap {
            id: None,
            hash: Some(hash),
            source: SOURCE.to_string(),
            filename: file.filename,
            file_path: file.file_path.display().to_string(),
            state: ScrapState::Processing,
            timestamp,
            occurrence_time,
            class: None,
        })
    }
}

/// Creation time becomes the scrap timestamp and modification time its
/// occurrence time; either may be unavailable on a given filesystem.
fn file_times(file: &ScrapeFile) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let Ok(metadata) = std::fs::metadata(&file.file_path) else {
        return (None, None);
    };
    let created = metadata.created().ok().map(DateTime::<Utc>::from);
    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    (created, modified)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_times_of_a_fresh_file_are_recent() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("f.txt");
        std::fs::write(&path, "x").unwrap();

        let (_, modified) = file_times(&ScrapeFile {
            file_path: path,
            filename: "f.txt".to_string(),
        });
        let modified = modified.expect("mtime is always available");
        assert!(Utc::now().signed_duration_since(modified).num_minutes() < 5);
    }

    #[test]
    fn file_times_of_a_missing_file_are_none() {
        let (timestamp, occurrence_time) = file_times(&ScrapeFile {
            file_path: "/nonexistent".into(),
            filename: "nonexistent".to_string(),
        });
        assert_eq!(timestamp, None);
        assert_eq!(occurrence_time, None);
    }
}
