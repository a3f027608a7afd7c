mod common;

use serde_json::{Value, json};

use search_bridge::catalog::CatalogResource;
use search_bridge::domain::{Filter, Inclusion, Related};
use search_bridge::filter_mapper::FilterMapper;
use search_bridge::response_mapper::ResponseMapper;
use search_bridge::scoring::Scores;

use common::MockCatalog;

fn catalog() -> MockCatalog {
    MockCatalog::default()
        .with(
            CatalogResource::Datasets,
            vec![
                json!({
                    "pid": "20.500/p1",
                    "datasetName": "Lysozyme",
                    "isPublished": true,
                    "sampleId": "s1",
                    "instrument": {"pid": "i1", "name": "LoKI"}
                }),
                json!({"pid": "20.500/p2", "datasetName": "Empty"}),
            ],
        )
        .with(
            CatalogResource::PublishedData,
            vec![json!({
                "doi": "10.1/doc",
                "title": "Structure",
                "abstract": "About lysozyme",
                "publicationYear": 2019,
                "pidArray": ["20.500/p1", "20.500/20.500/gone"],
                "creator": ["Ada"],
                "authors": ["Ada", "Grace"]
            })],
        )
        .with(
            CatalogResource::Samples,
            vec![
                json!({"sampleId": "s1", "description": "crystal"}),
                json!({"sampleId": "s2", "description": "powder"}),
            ],
        )
}

fn include(relations: &[(&str, Filter)]) -> Filter {
    Filter {
        include: relations
            .iter()
            .map(|(relation, scope)| Inclusion::scoped(*relation, scope.clone()))
            .collect(),
        ..Filter::default()
    }
}

fn records(catalog: &MockCatalog, resource: CatalogResource) -> Vec<Value> {
    use search_bridge::catalog::CatalogClient;
    use search_bridge::filter_mapper::CatalogFilter;
    catalog.find(resource, &CatalogFilter::default()).unwrap()
}

#[test]
fn dataset_document_stops_at_reciprocal_depth() {
    let catalog = catalog();
    let filters = FilterMapper::default();
    let mapper = ResponseMapper::new(&catalog, &filters, "ESS", false);
    let filter = include(&[("document", include(&[("datasets", Filter::default())]))]);

    let datasets = mapper
        .datasets(records(&catalog, CatalogResource::Datasets), &filter, &Scores::new())
        .unwrap();
    assert_eq!(datasets.len(), 2);

    let Some(Related::Found(document)) = &datasets[0].document else {
        panic!("expected a document for {:?}", datasets[0].pid);
    };
    assert_eq!(document.pid.as_deref(), Some("10.1/doc"));
    assert_eq!(document.summary.as_deref(), Some("About lysozyme"));
    assert!(document.datasets.is_none());

    assert_eq!(datasets[1].document, Some(Related::Missing(Default::default())));
    let value = serde_json::to_value(&datasets[1]).unwrap();
    assert_eq!(value["document"], json!({}));
}

#[test]
fn document_datasets_use_normalized_pids_and_skip_missing() {
    let catalog = catalog();
    let log = catalog.log();
    let filters = FilterMapper::default();
    let mapper = ResponseMapper::new(&catalog, &filters, "ESS", false).with_workers(2);
    let filter = include(&[("datasets", include(&[("document", Filter::default())]))]);

    let documents = mapper
        .documents(records(&catalog, CatalogResource::PublishedData), &filter, &Scores::new())
        .unwrap();
    let datasets = documents[0].datasets.as_ref().unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].pid.as_deref(), Some("20.500/p1"));
    assert!(datasets[0].document.is_none());

    let lookups = log.for_resource(CatalogResource::Datasets);
    assert!(lookups.contains(&json!({"where": {"pid": "20.500/p1"}})));
    assert!(lookups.contains(&json!({"where": {"pid": "20.500/gone"}})));
}

#[test]
fn document_members_come_from_creators_and_authors() {
    let catalog = catalog();
    let filters = FilterMapper::default();
    let mapper = ResponseMapper::new(&catalog, &filters, "ESS", false);
    let filter = include(&[("members", include(&[("person", Filter::default())]))]);

    let documents = mapper
        .documents(records(&catalog, CatalogResource::PublishedData), &filter, &Scores::new())
        .unwrap();
    let names: Vec<_> = documents[0]
        .members
        .as_ref()
        .unwrap()
        .iter()
        .map(|member| member.person.full_name.as_str())
        .collect();
    assert_eq!(names, vec!["Ada", "Grace"]);
    assert!(documents[0].is_public);
    assert_eq!(documents[0].release_date.as_deref(), Some("2019-01-01T00:00:00.000Z"));
}

#[test]
fn dataset_samples_and_instrument_are_resolved() {
    let catalog = catalog();
    let filters = FilterMapper::default();
    let mapper = ResponseMapper::new(&catalog, &filters, "ESS", false);
    let filter = include(&[
        ("samples", Filter::with_where(json!({"name": "crystal"}))),
        ("instrument", Filter::default()),
    ]);

    let datasets = mapper
        .datasets(records(&catalog, CatalogResource::Datasets), &filter, &Scores::new())
        .unwrap();
    let samples = datasets[0].samples.as_ref().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].pid.as_deref(), Some("s1"));
    let instrument = datasets[0].instrument.as_ref().unwrap();
    assert_eq!(instrument.facility.as_deref(), Some("ESS"));
    assert_eq!(datasets[1].samples.as_deref(), Some(&[][..]));
    assert_eq!(datasets[1].instrument, Some(Default::default()));
}

#[test]
fn scores_only_apply_when_scoring_is_enabled() {
    let catalog = catalog();
    let filters = FilterMapper::default();
    let scores: Scores = [("20.500/p1".to_string(), 0.4)].into_iter().collect();

    let disabled = ResponseMapper::new(&catalog, &filters, "ESS", false)
        .datasets(records(&catalog, CatalogResource::Datasets), &Filter::default(), &scores)
        .unwrap();
    assert_eq!(disabled[0].score, 0.0);

    let enabled = ResponseMapper::new(&catalog, &filters, "ESS", true)
        .datasets(records(&catalog, CatalogResource::Datasets), &Filter::default(), &scores)
        .unwrap();
    assert_eq!(enabled[0].score, 0.4);
    assert_eq!(enabled[1].score, 0.0);
    assert_eq!(enabled[0].title.as_deref(), Some("Lysozyme"));
    assert_eq!(enabled[0].is_public, Some(true));
}
