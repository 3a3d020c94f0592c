use super::Scrap;

/// Status string carried by a CompletionNotice for a scrap which
/// finished processing.
pub const COMPLETION_STATUS_PROCESSED: &str = "PROCESSED";

/// Bus message published by the collector stage onto the scraps topic.
///
/// The scrap itself travels as embedded JSON so that the envelope can be
/// decoded (and its paths inspected) without committing to the scrap
/// schema. Processors pick `unc_path` on Windows and `mounted_path`
/// everywhere else.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScrapEnvelope {
    pub scrap_data: String,
    pub mounted_path: String,
    pub unc_path: String,
}

impl ScrapEnvelope {
    pub fn new(scrap: &Scrap, mounted_path: String, unc_path: String) -> serde_json::Result<Self> {
        Ok(Self {
            scrap_data: scrap.to_json()?,
            mounted_path,
            unc_path,
        })
    }

    /// Rehydrate the embedded scrap.
    pub fn scrap(&self) -> serde_json::Result<Scrap> {
        Scrap::from_json(&self.scrap_data)
    }
}

/// Bus message published by the processing stage onto the completion
/// topic once a scrap resolves. Advisory only: the collector stage uses
/// it to release in-flight hashes, and correctness never depends on it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompletionNotice {
    pub scrap_id: i64,
    pub hash: String,
    pub status: String,
}

impl CompletionNotice {
    pub fn processed(scrap_id: i64, hash: String) -> Self {
        Self {
            scrap_id,
            hash,
            status: COMPLETION_STATUS_PROCESSED.to_string(),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == COMPLETION_STATUS_PROCESSED
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ScrapState;

    #[test]
    fn envelope_embeds_and_rehydrates_scrap() {
        let scrap = Scrap {
            id: Some(7),
            hash: Some("b".repeat(64)),
            source: "local".to_string(),
            filename: "leak.csv".to_string(),
            file_path: "/mnt/upstream_scraps/leak.csv".to_string(),
            state: ScrapState::Processing,
            timestamp: None,
            occurrence_time: None,
            class: None,
        };

        let envelope = ScrapEnvelope::new(
            &scrap,
            "/mnt/upstream_scraps/leak.csv".to_string(),
            r"\\upstream-server\scraps\leak.csv".to_string(),
        )
        .unwrap();

        let wire = serde_json::to_string(&envelope).unwrap();
        let decoded: ScrapEnvelope = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded.scrap().unwrap(), scrap);
        assert_eq!(decoded.mounted_path, "/mnt/upstream_scraps/leak.csv");
    }

    #[test]
    fn completion_notice_wire_shape() {
        let notice = CompletionNotice::processed(7, "b".repeat(64));
        assert!(notice.is_processed());

        insta::assert_json_snapshot!(notice, @r###"
        {
          "scrap_id": 7,
          "hash": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
          "status": "PROCESSED"
        }
        "###);
    }
}
