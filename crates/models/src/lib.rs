mod messages;
mod scrap;
mod state;

pub use messages::{CompletionNotice, ScrapEnvelope, COMPLETION_STATUS_PROCESSED};
pub use scrap::{ElasticChunk, Pattern, Scrap};
pub use state::{ScrapState, UnknownState};

/// Byte limit of a single search-index chunk.
pub const CHUNK_SIZE: usize = 1_000_000;
