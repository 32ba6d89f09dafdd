use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::MibigError;
use crate::store::Store;
use crate::taxonomy::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "mibig-sideload.json";
pub const DEFAULT_DOI_CACHE: &str = "doi_cache.json";
pub const DEFAULT_PUBMED_CACHE: &str = "pubmed_cache.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub doi_cache: Option<String>,
    #[serde(default)]
    pub pubmed_cache: Option<String>,
    #[serde(default)]
    pub ncbi_email: Option<String>,
    #[serde(default)]
    pub taxonomy: Option<TaxonomySettings>,
    #[serde(default)]
    pub zip: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TaxonomySettings {
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub cache_dir: Utf8PathBuf,
    pub doi_cache: String,
    pub pubmed_cache: String,
    pub ncbi_email: Option<String>,
    pub retry: RetryPolicy,
    pub zip: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; the default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MibigError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MibigError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MibigError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MibigError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(MibigError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let cache_dir = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => Store::default_cache_root()?,
        };

        let defaults = RetryPolicy::default();
        let taxonomy = config.taxonomy.unwrap_or_default();
        let retry = RetryPolicy {
            attempts: taxonomy.attempts.unwrap_or(defaults.attempts).max(1),
            delay: taxonomy
                .delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.delay),
        };

        Ok(ResolvedConfig {
            schema_version,
            cache_dir,
            doi_cache: config.doi_cache.unwrap_or_else(|| DEFAULT_DOI_CACHE.to_string()),
            pubmed_cache: config
                .pubmed_cache
                .unwrap_or_else(|| DEFAULT_PUBMED_CACHE.to_string()),
            ncbi_email: config.ncbi_email.filter(|email| !email.trim().is_empty()),
            retry,
            zip: config.zip.unwrap_or(true),
        })
    }
}
