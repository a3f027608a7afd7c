use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_TTL_SECONDS, RecordCache};
use crate::catalog::DEFAULT_CATALOG_URL;
use crate::error::BridgeError;
use crate::scoring::DEFAULT_SCORING_URL;
use crate::store::{JsonFileStore, MemoryStore, RecordStore};
use crate::technique_source::{BioPortalSource, GitHubOwlSource, OntologySource};
use crate::techniques::{CachedTechniques, FreeFormTechniques, TechniqueStrategy};

pub const DEFAULT_CONFIG_FILE: &str = "search-bridge.json";
pub const DEFAULT_FACILITY: &str = "ESS";
pub const DEFAULT_TECHNIQUE_COLLECTION: &str = "techniques";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub ontology_url: Option<String>,
    #[serde(default)]
    pub scoring_url: Option<String>,
    #[serde(default)]
    pub scoring_enabled: Option<bool>,
    #[serde(default)]
    pub return_zero_score: Option<bool>,
    #[serde(default)]
    pub pass_ids_to_scoring: Option<bool>,
    #[serde(default)]
    pub facility: Option<String>,
    #[serde(default)]
    pub techniques: Option<TechniqueConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TechniqueSourceKind {
    #[default]
    FreeForm,
    Bioportal,
    GithubOwl,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TechniqueConfig {
    #[serde(default)]
    pub source: TechniqueSourceKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub collection: Option<String>,
    /// Directory for the JSON record store.
    #[serde(default)]
    pub path: Option<String>,
    /// Keep records in the user cache directory when no `path` is given.
    #[serde(default)]
    pub persistent: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TechniqueSource {
    FreeForm,
    BioPortal { url: String, api_key: Option<String> },
    GitHubOwl {
        repo_url: Option<String>,
        commit: Option<String>,
        file: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    UserCache,
    Directory(Utf8PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTechniques {
    pub source: TechniqueSource,
    pub ttl_seconds: u64,
    pub collection: String,
    pub store: StoreLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub catalog_url: String,
    pub ontology_url: Option<String>,
    pub scoring_url: String,
    pub scoring_enabled: bool,
    pub return_zero_score: bool,
    pub pass_ids_to_scoring: bool,
    pub facility: String,
    pub techniques: ResolvedTechniques,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file and applies environment overrides. Without an
    /// explicit path a missing `search-bridge.json` means defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BridgeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| BridgeError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| BridgeError::ConfigParse(err.to_string()))?
        };

        Ok(Self::resolve_config(config)?.apply_env())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BridgeError> {
        let techniques = config.techniques.unwrap_or_default();
        let source = match techniques.source {
            TechniqueSourceKind::FreeForm => TechniqueSource::FreeForm,
            TechniqueSourceKind::Bioportal => TechniqueSource::BioPortal {
                url: techniques.url.ok_or_else(|| {
                    BridgeError::ConfigParse("bioportal technique source requires a url".to_string())
                })?,
                api_key: techniques.api_key,
            },
            TechniqueSourceKind::GithubOwl => TechniqueSource::GitHubOwl {
                repo_url: techniques.repo_url,
                commit: techniques.commit,
                file: techniques.file,
            },
        };
        let store = match (techniques.cache.path, techniques.cache.persistent) {
            (Some(path), _) => StoreLocation::Directory(Utf8PathBuf::from(path)),
            (None, Some(true)) => StoreLocation::UserCache,
            (None, _) => StoreLocation::Memory,
        };

        Ok(ResolvedConfig {
            catalog_url: config
                .catalog_url
                .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string()),
            ontology_url: config.ontology_url.filter(|url| !url.trim().is_empty()),
            scoring_url: config
                .scoring_url
                .unwrap_or_else(|| DEFAULT_SCORING_URL.to_string()),
            scoring_enabled: config.scoring_enabled.unwrap_or(false),
            return_zero_score: config.return_zero_score.unwrap_or(false),
            pass_ids_to_scoring: config.pass_ids_to_scoring.unwrap_or(false),
            facility: config
                .facility
                .unwrap_or_else(|| DEFAULT_FACILITY.to_string()),
            techniques: ResolvedTechniques {
                source,
                ttl_seconds: techniques.cache.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
                collection: techniques
                    .cache
                    .collection
                    .unwrap_or_else(|| DEFAULT_TECHNIQUE_COLLECTION.to_string()),
                store,
            },
        })
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ResolvedConfig {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            ontology_url: None,
            scoring_url: DEFAULT_SCORING_URL.to_string(),
            scoring_enabled: false,
            return_zero_score: false,
            pass_ids_to_scoring: false,
            facility: DEFAULT_FACILITY.to_string(),
            techniques: ResolvedTechniques {
                source: TechniqueSource::FreeForm,
                ttl_seconds: DEFAULT_TTL_SECONDS,
                collection: DEFAULT_TECHNIQUE_COLLECTION.to_string(),
                store: StoreLocation::Memory,
            },
        }
    }
}

impl ResolvedConfig {
    pub fn apply_env(self) -> Self {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("BASE_URL") {
            self.catalog_url = url;
        }
        if let Some(url) = lookup("PANET_BASE_URL") {
            self.ontology_url = Some(url).filter(|url| !url.trim().is_empty());
        }
        if let Some(url) = lookup("PSS_BASE_URL") {
            self.scoring_url = url;
        }
        if let Some(facility) = lookup("FACILITY") {
            self.facility = facility;
        }
        if let Some(value) = lookup("PSS_ENABLE") {
            self.scoring_enabled = parse_bool(&value, false);
        }
        if let Some(value) = lookup("RETURN_ZERO_SCORE") {
            self.return_zero_score = parse_bool(&value, false);
        }
        if let Some(value) = lookup("PASS_DOCUMENTS_TO_SCORING") {
            self.pass_ids_to_scoring = parse_bool(&value, false);
        }
        self
    }

    pub fn record_store(&self) -> Result<Arc<dyn RecordStore>, BridgeError> {
        Ok(match &self.techniques.store {
            StoreLocation::Memory => Arc::new(MemoryStore::new()),
            StoreLocation::UserCache => Arc::new(JsonFileStore::new()?),
            StoreLocation::Directory(path) => Arc::new(JsonFileStore::new_with_root(path.clone())),
        })
    }

    pub fn technique_strategy(&self) -> Result<TechniqueStrategy, BridgeError> {
        let source: Box<dyn OntologySource> = match &self.techniques.source {
            TechniqueSource::FreeForm => return Ok(TechniqueStrategy::FreeForm(FreeFormTechniques)),
            TechniqueSource::BioPortal { url, api_key } => {
                Box::new(BioPortalSource::new(url.clone(), api_key.clone())?)
            }
            TechniqueSource::GitHubOwl {
                repo_url,
                commit,
                file,
            } => Box::new(GitHubOwlSource::new(
                repo_url.as_deref(),
                commit.as_deref(),
                file.as_deref(),
            )?),
        };
        let cache = RecordCache::new(
            self.record_store()?,
            self.techniques.collection.clone(),
            self.techniques.ttl_seconds,
        );
        Ok(TechniqueStrategy::Cached(Arc::new(CachedTechniques::new(source, cache))))
    }
}

/// `true`, `1`, `yes` and `on` in any case are true; `false`, `0`, `no` and
/// `off` are false; anything else is `default`.
pub fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved, ResolvedConfig::default());
    }

    #[test]
    fn bool_parsing_falls_back() {
        assert!(parse_bool("YES", false));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("maybe", true));
    }
}
