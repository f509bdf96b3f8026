use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Gcs,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_thumbnail_cache_dir")]
    pub thumbnail_cache_dir: String,
    #[serde(default = "default_thumbnail_default_size")]
    pub thumbnail_default_size: u32,
    #[serde(default = "default_thumbnail_webp_quality")]
    pub thumbnail_webp_quality: u8,
    #[serde(default = "default_vector_index_dir")]
    pub vector_index_dir: String,
    pub plugin_dir: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub gcs_credentials_path: Option<String>,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default)]
    pub behind_proxy: bool,
    #[serde(default = "default_id_list_cap")]
    pub filter_id_list_cap: usize,
    #[serde(default = "default_batch_annotations_cap")]
    pub batch_annotations_cap: usize,
    #[serde(default = "default_thumbnail_backfill_cap")]
    pub thumbnail_backfill_cap: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            thumbnail_cache_dir: default_thumbnail_cache_dir(),
            thumbnail_default_size: default_thumbnail_default_size(),
            thumbnail_webp_quality: default_thumbnail_webp_quality(),
            vector_index_dir: default_vector_index_dir(),
            plugin_dir: None,
            host: default_host(),
            port: default_port(),
            gcs_credentials_path: None,
            storage: default_storage_kind(),
            behind_proxy: false,
            filter_id_list_cap: default_id_list_cap(),
            batch_annotations_cap: default_batch_annotations_cap(),
            thumbnail_backfill_cap: default_thumbnail_backfill_cap(),
        }
    }
}

fn default_db_path() -> String {
    "./data/datavisor.duckdb".to_string()
}

fn default_thumbnail_cache_dir() -> String {
    "./data/thumbnails".to_string()
}

fn default_thumbnail_default_size() -> u32 {
    256
}

fn default_thumbnail_webp_quality() -> u8 {
    80
}

fn default_vector_index_dir() -> String {
    "./data/vector-index".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_id_list_cap() -> usize {
    5000
}

fn default_batch_annotations_cap() -> usize {
    200
}

fn default_thumbnail_backfill_cap() -> usize {
    500
}

/// Loads configuration from an optional `config.toml` in the working
/// directory, overridden by `DATAVISOR_*` environment variables
/// (double-underscore separated for nested keys, e.g. `DATAVISOR_PORT`).
pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::with_prefix("datavisor").separator("__"))
        .build()?;

    config.try_deserialize()
}
