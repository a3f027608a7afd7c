use std::collections::HashMap;
use std::fs;

use assert_matches::assert_matches;

use search_bridge::config::{ConfigLoader, ResolvedConfig, StoreLocation, TechniqueSource};
use search_bridge::error::BridgeError;
use search_bridge::techniques::TechniqueStrategy;

#[test]
fn config_file_values_are_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search-bridge.json");
    fs::write(
        &path,
        r#"{
            "catalog_url": "https://catalog.example.org/api/v3",
            "scoring_enabled": true,
            "facility": "PSI",
            "techniques": {
                "source": "github_owl",
                "commit": "v1.0",
                "cache": {"ttl_seconds": 30, "collection": "panet"}
            }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(resolved.catalog_url, "https://catalog.example.org/api/v3");
    assert!(resolved.scoring_enabled);
    assert_eq!(resolved.facility, "PSI");
    assert_eq!(resolved.techniques.ttl_seconds, 30);
    assert_eq!(resolved.techniques.collection, "panet");
    assert_matches!(
        &resolved.techniques.source,
        TechniqueSource::GitHubOwl { commit: Some(commit), .. } if commit == "v1.0"
    );
    assert!(matches!(resolved.technique_strategy().unwrap(), TechniqueStrategy::Cached(_)));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    let err = ConfigLoader::resolve(missing.to_str()).unwrap_err();
    assert_matches!(err, BridgeError::ConfigRead(_));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, BridgeError::ConfigParse(_));
}

#[test]
fn bioportal_requires_url() {
    let config = serde_json::from_str(r#"{"techniques": {"source": "bioportal"}}"#).unwrap();
    assert_matches!(ConfigLoader::resolve_config(config), Err(BridgeError::ConfigParse(_)));
}

#[test]
fn environment_overrides_file_values() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("BASE_URL", "http://catalog:3000/api/v3"),
        ("PANET_BASE_URL", "http://panet:8000"),
        ("PSS_ENABLE", "1"),
        ("RETURN_ZERO_SCORE", "true"),
        ("PASS_DOCUMENTS_TO_SCORING", "yes"),
        ("FACILITY", "MAX IV"),
    ]);
    let resolved = ResolvedConfig::default().apply_env_with(|key| env.get(key).map(|value| value.to_string()));

    assert_eq!(resolved.catalog_url, "http://catalog:3000/api/v3");
    assert_eq!(resolved.ontology_url.as_deref(), Some("http://panet:8000"));
    assert!(resolved.scoring_enabled);
    assert!(resolved.return_zero_score);
    assert!(resolved.pass_ids_to_scoring);
    assert_eq!(resolved.facility, "MAX IV");
}

#[test]
fn blank_ontology_url_disables_expansion() {
    let resolved = ResolvedConfig::default()
        .apply_env_with(|key| (key == "PANET_BASE_URL").then(|| " ".to_string()));
    assert_eq!(resolved.ontology_url, None);
    assert!(matches!(resolved.technique_strategy().unwrap(), TechniqueStrategy::FreeForm(_)));
}

#[test]
fn cache_location_follows_path_then_persistent_flag() {
    let with_path = serde_json::from_str(
        r#"{"techniques": {"cache": {"path": "/var/cache/bridge", "persistent": true}}}"#,
    )
    .unwrap();
    assert_eq!(
        ConfigLoader::resolve_config(with_path).unwrap().techniques.store,
        StoreLocation::Directory("/var/cache/bridge".into())
    );

    let persistent = serde_json::from_str(r#"{"techniques": {"cache": {"persistent": true}}}"#).unwrap();
    assert_eq!(
        ConfigLoader::resolve_config(persistent).unwrap().techniques.store,
        StoreLocation::UserCache
    );

    assert_eq!(ResolvedConfig::default().techniques.store, StoreLocation::Memory);
}
