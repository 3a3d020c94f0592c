//! Full-text chunk index. Scrap files are split into ≤1MB chunks, each
//! indexed as one document; the store keeps a back-reference row per
//! chunk as the authoritative mapping between the two tiers.

use futures::stream::{FuturesUnordered, TryStreamExt};
use models::{ElasticChunk, Scrap, CHUNK_SIZE};
use store::Store;

/// Name of the chunk index. Must pre-exist; a missing index is a fatal
/// startup-time condition, not something created on the fly.
pub const CHUNKS_INDEX: &str = "scrapes_chunks";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("search index '{0}' is missing")]
    IndexMissing(String),
    #[error("elasticsearch request failed")]
    Http(#[from] reqwest::Error),
    #[error("elasticsearch returned status {status}: {body}")]
    Response { status: u16, body: String },
    #[error("invalid elasticsearch endpoint")]
    Endpoint(#[from] url::ParseError),
    #[error("scrap is missing its {0}, cannot index chunks")]
    MissingField(&'static str),
    #[error(transparent)]
    Scanner(#[from] scanner::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("chunk splitting task failed")]
    Join(#[from] tokio::task::JoinError),
}

/// Client over the search tier's REST API.
#[derive(Clone)]
pub struct SearchIndex {
    client: reqwest::Client,
    endpoint: url::Url,
    index: String,
    username: String,
    password: String,
}

/// Wire form of one indexed chunk document.
#[derive(Debug, serde::Serialize)]
struct ChunkDocument<'a> {
    scrap_id: i64,
    chunk_number: u32,
    content: &'a str,
    title: &'a str,
    hash: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct IndexResponse {
    #[serde(rename = "_id")]
    id: String,
}

impl SearchIndex {
    pub fn connect(scheme: &str, host: &str, port: u16, username: &str, password: &str) -> Result<Self, Error> {
        let endpoint = url::Url::parse(&format!("{scheme}://{host}:{port}"))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            index: CHUNKS_INDEX.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Index a single chunk document, returning its document id.
    pub async fn save_scrap_chunk(&self, chunk: &ElasticChunk) -> Result<String, Error> {
        let url = self
            .endpoint
            .join(&format!("{}/_doc", self.index))?;

        let document = ChunkDocument {
            scrap_id: chunk.scrap_id,
            chunk_number: chunk.chunk_number,
            content: &chunk.chunk_content,
            title: &chunk.title,
            hash: &chunk.hash,
        };

        let response = self
            .client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&document)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::IndexMissing(self.index.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Response {
                status: status.as_u16(),
                body,
            });
        }

        let indexed: IndexResponse = response.json().await?;
        tracing::debug!(
            scrap_id = chunk.scrap_id,
            chunk_number = chunk.chunk_number,
            elastic_id = %indexed.id,
            "indexed scrap chunk"
        );
        Ok(indexed.id)
    }

    /// Split the scrap's file and index every chunk, inserting the
    /// back-reference row for each. Chunks index concurrently; the first
    /// chunk-level error aborts the save. Partial chunks may remain and
    /// are absorbed on re-attempt by the `(scrap_id, chunk_number)` key.
    pub async fn save_scrap_chunks(&self, store: &Store, scrap: &Scrap) -> Result<Vec<String>, Error> {
        let scrap_id = scrap.id.ok_or(Error::MissingField("id"))?;
        let hash = scrap.hash.clone().ok_or(Error::MissingField("hash"))?;
        let title = scrap.filename.clone();

        let path = scrap.file_path.clone();
        let chunks =
            tokio::task::spawn_blocking(move || scanner::split_file_into_chunks(path, CHUNK_SIZE))
                .await??;

        let elastic_ids: Vec<String> = chunks
            .into_iter()
            .map(|(chunk_number, chunk_content)| {
                let chunk = ElasticChunk {
                    scrap_id,
                    chunk_number,
                    chunk_content,
                    title: title.clone(),
                    hash: hash.clone(),
                };
                async move {
                    let elastic_id = self.save_scrap_chunk(&chunk).await?;
                    store
                        .save_elastic_chunk(scrap_id, chunk.chunk_number, &elastic_id, &chunk.title)
                        .await?;
                    Ok::<String, Error>(elastic_id)
                }
            })
            .collect::<FuturesUnordered<_>>()
            .try_collect()
            .await?;

        tracing::info!(scrap_id, chunks = elastic_ids.len(), "indexed scrap chunks");
        Ok(elastic_ids)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chunk_document_wire_shape() {
        let document = ChunkDocument {
            scrap_id: 9,
            chunk_number: 2,
            content: "AKIA...",
            title: "dump.txt",
            hash: &"c".repeat(64),
        };

        insta::assert_json_snapshot!(document, @r###"
        {
          "scrap_id": 9,
          "chunk_number": 2,
          "content": "AKIA...",
          "title": "dump.txt",
          "hash": "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"
        }
        "###);
    }

    #[test]
    fn index_response_decodes_document_id() {
        let response: IndexResponse =
            serde_json::from_str(r#"{"_index":"scrapes_chunks","_id":"abc123","result":"created"}"#)
                .unwrap();
        assert_eq!(response.id, "abc123");
    }
}
