//! The local filesystem plugin: watches a directory for dropped files,
//! hashes them into scraps, and processes them through the core
//! protocol, parking finished files in a processed directory.

mod collector;
mod processor;
mod service;

pub use collector::LocalCollector;
pub use processor::LocalProcessor;
pub use service::{LocalService, ScrapeFile};

/// Source tag stamped onto every scrap this plugin collects.
pub const SOURCE: &str = "local";

fn default_enabled() -> bool {
    true
}
fn default_watch_directory() -> String {
    "./data/local_ingest".to_string()
}
fn default_processed_directory() -> String {
    "./data/local_ingest_processed".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LocalPluginConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_watch_directory")]
    pub watch_directory: String,
    #[serde(default = "default_processed_directory")]
    pub processed_directory: String,
}

impl Default for LocalPluginConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            watch_directory: default_watch_directory(),
            processed_directory: default_processed_directory(),
        }
    }
}
