use serde_json::{Value, json};

use search_bridge::domain::{Filter, Inclusion};
use search_bridge::inclusions::{filter_on_primary, filter_on_secondary, get_inclusion_names, prune_values};

fn documents() -> Vec<Value> {
    vec![
        json!({"pid": "d1", "datasets": [
            {"pid": "p1", "techniques": [{"pid": "t1"}]},
            {"pid": "p2", "techniques": []}
        ]}),
        json!({"pid": "d2", "datasets": [{"pid": "p3", "techniques": [{}]}]}),
        json!({"pid": "d3", "datasets": []}),
    ]
}

fn technique_filter() -> Filter {
    Filter {
        include: vec![Inclusion::scoped(
            "datasets",
            Filter {
                include: vec![Inclusion::scoped(
                    "techniques",
                    Filter::with_where(json!({"pid": "t1"})),
                )],
                ..Filter::default()
            },
        )],
        ..Filter::default()
    }
}

#[test]
fn secondary_pruning_is_idempotent() {
    let once = filter_on_secondary(documents(), "datasets", "techniques");
    let twice = filter_on_secondary(once.clone(), "datasets", "techniques");
    assert_eq!(once, twice);
    assert_eq!(once.len(), 1);
    assert_eq!(once[0]["pid"], json!("d1"));
    assert_eq!(once[0]["datasets"].as_array().unwrap().len(), 1);
}

#[test]
fn primary_pruning_is_idempotent() {
    let once = filter_on_primary(documents(), "datasets");
    let twice = filter_on_primary(once.clone(), "datasets");
    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
}

#[test]
fn prune_values_follows_filter_relations() {
    let filter = technique_filter();
    assert_eq!(
        get_inclusion_names(&filter).get("datasets"),
        Some(&vec!["techniques".to_string()])
    );
    let pruned = prune_values(documents(), &filter);
    assert_eq!(pruned, prune_values(pruned.clone(), &filter));
    assert_eq!(pruned.len(), 1);
}

#[test]
fn unconstrained_relations_keep_everything() {
    let filter = Filter {
        include: vec![Inclusion::new("datasets")],
        ..Filter::default()
    };
    assert_eq!(prune_values(documents(), &filter), documents());
}
