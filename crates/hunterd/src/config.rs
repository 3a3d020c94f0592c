//! Configuration: a YAML file merged with the process environment,
//! environment winning. Environment keys use `__` as a path separator
//! (`POSTGRES__HOST` is `postgres.host`); numeric segments promote to
//! list indices (`SMB_SERVERS__0__SHARE` is `smb_servers[0].share`).

use anyhow::Context;
use plugins::local::LocalPluginConfig;
use serde_yaml::{Mapping, Value};
use std::path::Path;

fn default_true() -> bool {
    true
}
fn default_collector_concurrency() -> usize {
    pipeline::DEFAULT_COLLECTOR_CONCURRENCY
}
fn default_processor_concurrency() -> usize {
    pipeline::DEFAULT_PROCESSOR_CONCURRENCY
}
fn default_polling_interval() -> u64 {
    1
}

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub upstream_smb: UpstreamSmbConfig,
    #[serde(default)]
    pub smb_servers: Vec<SmbServerConfig>,
    #[serde(default)]
    pub local_plugin: LocalPluginConfig,
    /// Run the collector stage in this process.
    #[serde(default = "default_true")]
    pub collecting: bool,
    /// Run the processing stage in this process.
    #[serde(default = "default_true")]
    pub processing: bool,
    #[serde(default = "default_collector_concurrency")]
    pub collector_concurrency: usize,
    #[serde(default = "default_processor_concurrency")]
    pub processor_concurrency: usize,
    /// Seconds each collector driver sleeps between iterations.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database: "cti_breach_hunter".to_string(),
            user: "cti_user".to_string(),
            password: "cti_password".to_string(),
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

impl PostgresConfig {
    pub fn connect_options(&self) -> sqlx::postgres::PgConnectOptions {
        sqlx::postgres::PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .application_name("hunterd")
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub user: String,
    pub password: String,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9200,
            scheme: "http".to_string(),
            user: "elastic".to_string(),
            password: "password".to_string(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub processed_topic: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: bus::DEFAULT_SCRAPS_TOPIC.to_string(),
            processed_topic: bus::DEFAULT_COMPLETION_TOPIC.to_string(),
        }
    }
}

// Credentials feed the external mount tooling, not this process.
#[allow(dead_code)]
#[derive(Debug, serde::Deserialize)]
#[serde(default)]
pub struct UpstreamSmbConfig {
    pub share: String,
    pub username: String,
    pub password: String,
    pub mount_point: String,
    pub anonymous: bool,
}

impl Default for UpstreamSmbConfig {
    fn default() -> Self {
        Self {
            share: "//upstream-server/scraps".to_string(),
            username: "upstream_user".to_string(),
            password: "upstream_password".to_string(),
            mount_point: "/mnt/upstream_scraps".to_string(),
            anonymous: false,
        }
    }
}

/// A downstream SMB source share. Mounting is operational; these
/// entries only describe where the mounts live.
#[allow(dead_code)]
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SmbServerConfig {
    pub enabled: bool,
    pub share: String,
    pub username: String,
    pub password: String,
    pub mount_point: String,
    pub anonymous: bool,
}

impl Config {
    /// Load the YAML file (a missing file means environment only) and
    /// fold the process environment over it.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut root = match std::fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using environment only");
                Value::Mapping(Mapping::new())
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config file {}", path.display()))
            }
        };

        merge_env(&mut root, std::env::vars());
        serde_yaml::from_value(root).context("invalid configuration")
    }
}

/// Fold environment variables over the config tree. Every key is
/// lowercased; `__` segments descend into nested mappings or, for
/// numeric segments, sequences. Values parse as YAML scalars so
/// numbers and booleans keep their types.
fn merge_env(root: &mut Value, vars: impl Iterator<Item = (String, String)>) {
    for (key, raw) in vars {
        let key = key.to_lowercase();
        let value: Value =
            serde_yaml::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()));

        let mut node = &mut *root;
        for segment in key.split("__") {
            node = child(node, segment);
        }
        *node = value;
    }
}

/// Descend one segment, materializing the container along the way.
fn child<'v>(value: &'v mut Value, segment: &str) -> &'v mut Value {
    if let Ok(index) = segment.parse::<usize>() {
        if !matches!(value, Value::Sequence(_)) {
            *value = Value::Sequence(Vec::new());
        }
        let Value::Sequence(seq) = value else {
            unreachable!()
        };
        // Fill gaps with empty mappings so sparse indices still
        // deserialize as defaulted entries.
        while seq.len() <= index {
            seq.push(Value::Mapping(Mapping::new()));
        }
        &mut seq[index]
    } else {
        if !matches!(value, Value::Mapping(_)) {
            *value = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = value else {
            unreachable!()
        };
        let key = Value::String(segment.to_string());
        if !map.contains_key(&key) {
            map.insert(key.clone(), Value::Null);
        }
        map.get_mut(&key).expect("key was just inserted")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn from_yaml(yaml: &str, vars: Vec<(&str, &str)>) -> Config {
        let mut root: Value = serde_yaml::from_str(yaml).unwrap();
        merge_env(
            &mut root,
            vars.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        serde_yaml::from_value(root).unwrap()
    }

    #[test]
    fn defaults_apply_without_file_or_environment() {
        let config = from_yaml("{}", vec![]);
        assert!(config.collecting);
        assert!(config.processing);
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.kafka.topic, "scraps");
        assert_eq!(config.kafka.processed_topic, "processed_topic");
        assert_eq!(config.collector_concurrency, 10);
        assert_eq!(config.processor_concurrency, 100);
        assert!(config.local_plugin.enabled);
    }

    #[test]
    fn environment_wins_over_the_file() {
        let config = from_yaml(
            "postgres:\n  host: from-file\n  port: 9999\n",
            vec![("POSTGRES__HOST", "from-env")],
        );
        assert_eq!(config.postgres.host, "from-env");
        assert_eq!(config.postgres.port, 9999);
    }

    #[test]
    fn env_scalars_keep_their_types() {
        let config = from_yaml(
            "{}",
            vec![
                ("POSTGRES__PORT", "5433"),
                ("COLLECTING", "false"),
                ("POLLING_INTERVAL", "30"),
            ],
        );
        assert_eq!(config.postgres.port, 5433);
        assert!(!config.collecting);
        assert!(config.processing);
        assert_eq!(config.polling_interval, 30);
    }

    #[test]
    fn numeric_segments_promote_to_list_indices() {
        let config = from_yaml(
            "{}",
            vec![
                ("SMB_SERVERS__0__SHARE", "//smb-server0/scraps"),
                ("SMB_SERVERS__1__SHARE", "//smb-server1/scraps"),
                ("SMB_SERVERS__1__ENABLED", "true"),
            ],
        );
        assert_eq!(config.smb_servers.len(), 2);
        assert_eq!(config.smb_servers[0].share, "//smb-server0/scraps");
        assert!(!config.smb_servers[0].enabled);
        assert!(config.smb_servers[1].enabled);
    }

    #[test]
    fn sparse_list_indices_default_earlier_entries() {
        let config = from_yaml("{}", vec![("SMB_SERVERS__1__SHARE", "//only-one/scraps")]);
        assert_eq!(config.smb_servers.len(), 2);
        assert_eq!(config.smb_servers[0].share, "");
        assert_eq!(config.smb_servers[1].share, "//only-one/scraps");
    }

    #[test]
    fn unrelated_environment_noise_is_ignored() {
        let config = from_yaml(
            "{}",
            vec![("HOME", "/root"), ("SOME__UNRELATED__KEY", "x")],
        );
        assert!(config.collecting);
    }

    #[test]
    fn missing_file_falls_back_to_environment_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.elasticsearch.port, 9200);
    }
}
