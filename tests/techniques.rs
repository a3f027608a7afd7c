use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use serde_json::json;

use search_bridge::cache::RecordCache;
use search_bridge::domain::{Filter, Inclusion};
use search_bridge::error::BridgeError;
use search_bridge::filter_mapper::FilterMapper;
use search_bridge::store::MemoryStore;
use search_bridge::technique_source::{LeafRule, OntologyNode, OntologySource};
use search_bridge::techniques::{CachedTechniques, TechniqueStrategy};

const NOW: i64 = 1_700_000_000_000;
const TTL: u64 = 60;

struct MockSource {
    fetches: Arc<AtomicUsize>,
    fail: bool,
}

fn node(id: &str, label: &str, synonyms: &[&str], parents: &[&str]) -> OntologyNode {
    OntologyNode {
        id: id.to_string(),
        label: label.to_string(),
        synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        parent_ids: parents.iter().map(|s| s.to_string()).collect(),
        child_ids: Vec::new(),
    }
}

impl OntologySource for MockSource {
    fn fetch_nodes(&self) -> Result<Vec<OntologyNode>, BridgeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BridgeError::OntologyHttp("connection refused".to_string()));
        }
        Ok(vec![
            node("t0", "x-ray technique", &[], &[]),
            node("t1", "x-ray diffraction", &["XRD"], &["t0"]),
            node("t2", "powder diffraction", &[], &["t1"]),
        ])
    }

    fn leaf_rule(&self) -> LeafRule {
        LeafRule::NotAParent
    }
}

fn techniques(fail: bool) -> (CachedTechniques, Arc<AtomicUsize>) {
    let fetches = Arc::new(AtomicUsize::new(0));
    let source = MockSource {
        fetches: fetches.clone(),
        fail,
    };
    let cache = RecordCache::new(Arc::new(MemoryStore::new()), "techniques", TTL);
    (CachedTechniques::new(Box::new(source), cache), fetches)
}

#[test]
fn names_and_synonyms_expand_to_descendants() {
    let (techniques, _) = techniques(false);
    assert_eq!(
        techniques
            .build_filter_at(&json!({"name": "x-ray diffraction"}), NOW)
            .unwrap(),
        json!({"pid": {"inq": ["t1", "t2"]}})
    );
    assert_eq!(
        techniques.build_filter_at(&json!({"name": "XRD"}), NOW).unwrap(),
        json!({"pid": {"inq": ["t1", "t2"]}})
    );
}

#[test]
fn negated_leaf_becomes_nin() {
    let (techniques, _) = techniques(false);
    assert_eq!(
        techniques
            .build_filter_at(&json!({"name": {"neq": "x-ray diffraction"}}), NOW)
            .unwrap(),
        json!({"pid": {"nin": ["t1", "t2"]}})
    );
}

#[test]
fn positive_or_collapses_to_single_inq() {
    let (techniques, _) = techniques(false);
    let built = techniques
        .build_filter_at(
            &json!({"or": [{"name": "powder diffraction"}, {"pid": "t0"}]}),
            NOW,
        )
        .unwrap();
    assert_eq!(built, json!({"pid": {"inq": ["t0", "t1", "t2"]}}));

    let mixed = techniques
        .build_filter_at(
            &json!({"and": [{"name": "x-ray technique"}, {"name": {"nin": ["powder diffraction"]}}]}),
            NOW,
        )
        .unwrap();
    assert_eq!(
        mixed,
        json!({"and": [
            {"pid": {"inq": ["t0", "t1", "t2"]}},
            {"pid": {"nin": ["t2"]}}
        ]})
    );
}

#[test]
fn ontology_is_fetched_once_until_stale() {
    let (techniques, fetches) = techniques(false);
    let leaf = json!({"name": "x-ray technique"});

    techniques.build_filter_at(&leaf, NOW).unwrap();
    techniques.build_filter_at(&leaf, NOW + 1_000).unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let later = NOW + (TTL as i64) * 1000 + 1;
    let records = techniques.build_techniques_at(&leaf, later).unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["createdAt"], json!(later));
}

#[test]
fn source_failures_propagate() {
    let (techniques, fetches) = techniques(true);
    let err = techniques
        .build_filter_at(&json!({"name": "x-ray technique"}), NOW)
        .unwrap_err();
    assert_matches!(err, BridgeError::OntologyHttp(_));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn dataset_filter_uses_cached_strategy() {
    let (techniques, _) = techniques(false);
    let mapper = FilterMapper::new(TechniqueStrategy::Cached(Arc::new(techniques)));
    let filter = Filter {
        include: vec![Inclusion::scoped(
            "techniques",
            Filter::with_where(json!({"name": "x-ray diffraction"})),
        )],
        ..Filter::default()
    };
    let mapped = mapper.dataset(&filter).unwrap();
    assert_eq!(
        mapped.where_clause(),
        Some(&json!({"techniques.pid": {"inq": ["t1", "t2"]}}))
    );
}
