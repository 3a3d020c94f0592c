use super::ScrapState;
use chrono::{DateTime, Utc};

/// One ingested artifact. Content-identity is the SHA-256 `hash`;
/// the surrogate `id` is assigned by the store on first insert.
///
/// A scrap is immutable after creation: downstream mutations (state,
/// class) happen only through store operations, and the in-memory copy
/// is rehydrated from the bus rather than shared across stages.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Scrap {
    #[serde(default)]
    pub id: Option<i64>,
    /// 64 lowercase hex characters, computed once by the scanner.
    /// Null only for scraps which never left the collector stage.
    #[serde(default)]
    pub hash: Option<String>,
    pub source: String,
    pub filename: String,
    /// Post-staging path, as visible to processors.
    pub file_path: String,
    pub state: ScrapState,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Source-provided event time, distinct from ingest time.
    #[serde(default)]
    pub occurrence_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub class: Option<String>,
}

impl Scrap {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// A ≤1MB slice of a scrap's file, as indexed into the search tier.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ElasticChunk {
    pub scrap_id: i64,
    /// 1-based and contiguous within a scrap.
    pub chunk_number: u32,
    pub chunk_content: String,
    pub title: String,
    pub hash: String,
}

/// A classifier pattern row. Patterns are ordered and classification
/// is first-match-wins.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Pattern {
    pub pattern: String,
    pub class: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixture() -> Scrap {
        Scrap {
            id: Some(42),
            hash: Some("a".repeat(64)),
            source: "local".to_string(),
            filename: "dump.txt".to_string(),
            file_path: "/mnt/upstream_scraps/dump.txt".to_string(),
            state: ScrapState::Processing,
            timestamp: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
            occurrence_time: None,
            class: None,
        }
    }

    #[test]
    fn scrap_json_round_trip() {
        let scrap = fixture();
        let json = scrap.to_json().unwrap();
        assert_eq!(Scrap::from_json(&json).unwrap(), scrap);
    }

    #[test]
    fn scrap_tolerates_omitted_fields() {
        // Fields absent from the wire are null, not an error.
        let scrap = Scrap::from_json(
            r#"{"source":"local","filename":"f","file_path":"/f","state":"PROCESSING"}"#,
        )
        .unwrap();
        assert_eq!(scrap.id, None);
        assert_eq!(scrap.hash, None);
        assert_eq!(scrap.timestamp, None);
        assert_eq!(scrap.class, None);
    }

    #[test]
    fn scrap_wire_shape() {
        insta::assert_json_snapshot!(fixture(), @r###"
        {
          "id": 42,
          "hash": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
          "source": "local",
          "filename": "dump.txt",
          "file_path": "/mnt/upstream_scraps/dump.txt",
          "state": "PROCESSING",
          "timestamp": "2024-03-01T12:30:00Z",
          "occurrence_time": null,
          "class": null
        }
        "###);
    }
}
