use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub nats: NatsConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct RecordingConfig {
    /// Root directory holding one subdirectory per recording session
    pub recordings_dir: String,
    #[serde(default = "default_chunk_duration_secs")]
    pub chunk_duration_secs: u64,
    #[serde(default = "default_min_free_disk_bytes")]
    pub min_free_disk_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct UploadConfig {
    /// Directory backing the local object store implementation
    pub remote_root: String,
    /// Owner id used as the first object key segment
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_part_size_bytes")]
    pub part_size_bytes: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default)]
    pub retry_jitter: bool,
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_nats_url")]
    pub url: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_nats_url(),
        }
    }
}

fn default_chunk_duration_secs() -> u64 {
    60
}

fn default_min_free_disk_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_concurrency() -> usize {
    3
}

fn default_part_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_max_ms() -> u64 {
    60_000
}

fn default_op_timeout_secs() -> u64 {
    30
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
