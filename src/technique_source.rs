use std::collections::{BTreeSet, HashMap, HashSet};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::graph::{Closure, build_forest};
use crate::http::{self, DEFAULT_TIMEOUT};
use crate::store::Record;

pub const DEFAULT_OWL_REPO: &str =
    "https://raw.githubusercontent.com/ExPaNDS-eu/ExPaNDS-experimental-techniques-ontology";
pub const DEFAULT_OWL_COMMIT: &str = "master";
pub const DEFAULT_OWL_FILE: &str = "source/PaNET.owl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntologyNode {
    pub id: String,
    pub label: String,
    pub synonyms: Vec<String>,
    pub parent_ids: Vec<String>,
    pub child_ids: Vec<String>,
}

/// How a source decides which nodes are leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafRule {
    NoChildren,
    NotAParent,
}

pub trait OntologySource: Send + Sync {
    fn fetch_nodes(&self) -> Result<Vec<OntologyNode>, BridgeError>;
    fn leaf_rule(&self) -> LeafRule;
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct BioPortalSource {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl BioPortalSource {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Result<Self, BridgeError> {
        let client = http::build_client(DEFAULT_TIMEOUT, BridgeError::OntologyHttp)?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }

    fn fetch_page(&self, page: u64) -> Result<Value, BridgeError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .query(&[
                ("include", "children,prefLabel,synonym,parents".to_string()),
                ("page", page.to_string()),
            ]);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("apikey token={key}"));
        }
        let response = request
            .send()
            .map_err(|err| BridgeError::OntologyHttp(err.to_string()))?;
        let response = http::check_status(response)
            .map_err(|(status, message)| BridgeError::OntologyStatus { status, message })?;
        response
            .json()
            .map_err(|err| BridgeError::MalformedPayload(err.to_string()))
    }
}

impl OntologySource for BioPortalSource {
    fn fetch_nodes(&self) -> Result<Vec<OntologyNode>, BridgeError> {
        let first = self.fetch_page(1)?;
        let (mut nodes, page_count) = parse_bioportal_page(&first)?;
        for page in 2..=page_count {
            let body = self.fetch_page(page)?;
            let (more, _) = parse_bioportal_page(&body)?;
            nodes.extend(more);
        }
        info!(nodes = nodes.len(), pages = page_count, "fetched BioPortal techniques");
        Ok(nodes)
    }

    fn leaf_rule(&self) -> LeafRule {
        LeafRule::NoChildren
    }
}

/// Parses one BioPortal page into nodes and the advertised page count.
pub fn parse_bioportal_page(body: &Value) -> Result<(Vec<OntologyNode>, u64), BridgeError> {
    let collection = body
        .get("collection")
        .and_then(Value::as_array)
        .ok_or_else(|| BridgeError::MalformedPayload("BioPortal page without collection".to_string()))?;
    let page_count = body.get("pageCount").and_then(Value::as_u64).unwrap_or(1);

    let ids = |items: Option<&Value>| -> Vec<String> {
        items
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("@id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let nodes = collection
        .iter()
        .map(|item| {
            let id = item
                .get("@id")
                .and_then(Value::as_str)
                .ok_or_else(|| BridgeError::MalformedPayload("BioPortal class without @id".to_string()))?;
            let label = item
                .get("prefLabel")
                .and_then(Value::as_str)
                .map(collapse_whitespace)
                .unwrap_or_default();
            let synonyms = item
                .get("synonym")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(collapse_whitespace)
                        .collect()
                })
                .unwrap_or_default();
            // a class whose parents all lack a label hangs off the ontology root
            let parents = item.get("parents").and_then(Value::as_array);
            let labelled_parent = parents.is_some_and(|parents| {
                parents
                    .iter()
                    .any(|parent| parent.get("prefLabel").is_some_and(|label| !label.is_null()))
            });
            let parent_ids = if labelled_parent {
                ids(item.get("parents"))
            } else {
                Vec::new()
            };
            Ok(OntologyNode {
                id: id.to_string(),
                label,
                synonyms,
                parent_ids,
                child_ids: ids(item.get("children")),
            })
        })
        .collect::<Result<Vec<_>, BridgeError>>()?;
    Ok((nodes, page_count))
}

pub struct GitHubOwlSource {
    client: Client,
    url: String,
}

impl GitHubOwlSource {
    pub fn new(
        repo_url: Option<&str>,
        commit: Option<&str>,
        file: Option<&str>,
    ) -> Result<Self, BridgeError> {
        let client = http::build_client(DEFAULT_TIMEOUT, BridgeError::OntologyHttp)?;
        Ok(Self {
            client,
            url: Self::file_url(repo_url, commit, file),
        })
    }

    pub fn file_url(repo_url: Option<&str>, commit: Option<&str>, file: Option<&str>) -> String {
        let repo = repo_url.unwrap_or(DEFAULT_OWL_REPO);
        let commit = commit.unwrap_or(DEFAULT_OWL_COMMIT);
        let file = file.unwrap_or(DEFAULT_OWL_FILE);
        http::join_url(repo, &format!("{commit}/{file}"))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl OntologySource for GitHubOwlSource {
    fn fetch_nodes(&self) -> Result<Vec<OntologyNode>, BridgeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|err| BridgeError::OntologyHttp(err.to_string()))?;
        let response = http::check_status(response)
            .map_err(|(status, message)| BridgeError::OntologyStatus { status, message })?;
        let text = response
            .text()
            .map_err(|err| BridgeError::OntologyHttp(err.to_string()))?;
        let nodes = parse_owl(&text)?;
        info!(nodes = nodes.len(), url = %self.url, "parsed OWL techniques");
        Ok(nodes)
    }

    fn leaf_rule(&self) -> LeafRule {
        LeafRule::NotAParent
    }
}

enum Capture {
    Label,
    AltLabel,
}

struct PendingClass {
    id: String,
    label: Option<String>,
    synonyms: Vec<String>,
    parent_ids: Vec<String>,
    depth: usize,
}

impl PendingClass {
    fn finish(self) -> OntologyNode {
        let label = self
            .label
            .unwrap_or_else(|| collapse_whitespace(self.id.rsplit('/').next().unwrap_or_default()));
        OntologyNode {
            id: self.id,
            label,
            synonyms: self.synonyms,
            parent_ids: self.parent_ids,
            child_ids: Vec::new(),
        }
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, BridgeError> {
    let malformed = |err: String| BridgeError::MalformedPayload(format!("OWL attribute {name}: {err}"));
    match element.try_get_attribute(name) {
        Ok(Some(attr)) => attr
            .unescape_value()
            .map(|value| Some(value.into_owned()))
            .map_err(|err| malformed(err.to_string())),
        Ok(None) => Ok(None),
        Err(err) => Err(malformed(err.to_string())),
    }
}

/// Reads `owl:Class[rdf:about]` elements with their labels, alternative
/// labels and `rdfs:subClassOf` parents. Child ids are filled in from the
/// parent links.
pub fn parse_owl(xml: &str) -> Result<Vec<OntologyNode>, BridgeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut nodes = Vec::new();
    let mut current: Option<PendingClass> = None;
    let mut capture: Option<(Capture, String)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| BridgeError::MalformedPayload(format!("OWL document: {err}")))?;
        match event {
            Event::Start(element) => match element.name().as_ref() {
                b"owl:Class" => match current.as_mut() {
                    Some(class) => class.depth += 1,
                    None => {
                        if let Some(id) = attribute(&element, "rdf:about")? {
                            current = Some(PendingClass {
                                id,
                                label: None,
                                synonyms: Vec::new(),
                                parent_ids: Vec::new(),
                                depth: 1,
                            });
                        }
                    }
                },
                b"rdfs:label" if current.is_some() => capture = Some((Capture::Label, String::new())),
                b"skos:altLabel" if current.is_some() => {
                    capture = Some((Capture::AltLabel, String::new()))
                }
                b"rdfs:subClassOf" => {
                    if let (Some(class), Some(parent)) =
                        (current.as_mut(), attribute(&element, "rdf:resource")?)
                    {
                        class.parent_ids.push(parent);
                    }
                }
                _ => {}
            },
            Event::Empty(element) => match element.name().as_ref() {
                b"owl:Class" if current.is_none() => {
                    if let Some(id) = attribute(&element, "rdf:about")? {
                        let class = PendingClass {
                            id,
                            label: None,
                            synonyms: Vec::new(),
                            parent_ids: Vec::new(),
                            depth: 0,
                        };
                        nodes.push(class.finish());
                    }
                }
                b"rdfs:subClassOf" => {
                    if let (Some(class), Some(parent)) =
                        (current.as_mut(), attribute(&element, "rdf:resource")?)
                    {
                        class.parent_ids.push(parent);
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if let Some((_, buffer)) = capture.as_mut() {
                    let text = text
                        .unescape()
                        .map_err(|err| BridgeError::MalformedPayload(err.to_string()))?;
                    buffer.push_str(&text);
                }
            }
            Event::End(element) => match element.name().as_ref() {
                b"rdfs:label" | b"skos:altLabel" => {
                    if let (Some((kind, buffer)), Some(class)) = (capture.take(), current.as_mut()) {
                        let value = collapse_whitespace(&buffer);
                        match kind {
                            Capture::Label => {
                                if class.label.is_none() {
                                    class.label = Some(value);
                                }
                            }
                            Capture::AltLabel => class.synonyms.push(value),
                        }
                    }
                }
                b"owl:Class" => {
                    if let Some(class) = current.as_mut() {
                        class.depth -= 1;
                        if class.depth == 0 {
                            if let Some(class) = current.take() {
                                nodes.push(class.finish());
                            }
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    link_children(&mut nodes);
    debug!(classes = nodes.len(), "parsed OWL classes");
    Ok(nodes)
}

fn link_children(nodes: &mut [OntologyNode]) {
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for node in nodes.iter() {
        for parent in &node.parent_ids {
            children
                .entry(parent.clone())
                .or_default()
                .push(node.id.clone());
        }
    }
    for node in nodes.iter_mut() {
        if let Some(ids) = children.remove(&node.id) {
            node.child_ids = ids;
        }
    }
}

/// Graph index over the fetched nodes plus the descendant-or-self closure
/// of every node, computed by walking parent links up from the leaves.
#[derive(Debug, Clone)]
pub struct OntologyGraph {
    nodes: Vec<OntologyNode>,
    relatives: Closure,
    by_label: HashMap<String, String>,
    by_synonym: HashMap<String, String>,
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, Vec<String>>,
    leaves: Vec<String>,
    roots: Vec<String>,
}

impl OntologyGraph {
    pub fn build(nodes: Vec<OntologyNode>, rule: LeafRule) -> Self {
        let referenced: HashSet<&str> = nodes
            .iter()
            .flat_map(|node| node.parent_ids.iter().map(String::as_str))
            .collect();
        let leaves: Vec<String> = nodes
            .iter()
            .filter(|node| match rule {
                LeafRule::NoChildren => node.child_ids.is_empty(),
                LeafRule::NotAParent => !referenced.contains(node.id.as_str()),
            })
            .map(|node| node.id.clone())
            .collect();
        let roots = nodes
            .iter()
            .filter(|node| node.parent_ids.is_empty())
            .map(|node| node.id.clone())
            .collect();

        let parents: HashMap<String, Vec<String>> = nodes
            .iter()
            .map(|node| (node.id.clone(), node.parent_ids.clone()))
            .collect();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for node in &nodes {
            for parent in &node.parent_ids {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }
        let mut by_label = HashMap::new();
        let mut by_synonym = HashMap::new();
        for node in &nodes {
            by_label
                .entry(node.label.clone())
                .or_insert_with(|| node.id.clone());
            for synonym in &node.synonyms {
                by_synonym
                    .entry(synonym.clone())
                    .or_insert_with(|| node.id.clone());
            }
        }

        let relatives = build_forest(&leaves, &parents);
        debug!(
            nodes = nodes.len(),
            leaves = leaves.len(),
            "computed technique closure"
        );
        Self {
            nodes,
            relatives,
            by_label,
            by_synonym,
            children,
            parents,
            leaves,
            roots,
        }
    }

    pub fn nodes(&self) -> &[OntologyNode] {
        &self.nodes
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.label.as_str())
    }

    pub fn id_for_label(&self, label: &str) -> Option<&str> {
        self.by_label.get(label).map(String::as_str)
    }

    pub fn id_for_synonym(&self, synonym: &str) -> Option<&str> {
        self.by_synonym.get(synonym).map(String::as_str)
    }

    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn parents_of(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// The node itself plus every node below it.
    pub fn relatives(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.relatives.get(id)
    }

    /// Cache records, produced lazily in node order:
    /// `{pid, name, synonym, relatives, createdAt}`.
    pub fn records(&self, created_at: i64) -> impl Iterator<Item = Record> + '_ {
        self.nodes.iter().map(move |node| {
            let relatives: Vec<String> = match self.relatives.get(&node.id) {
                Some(set) => set.iter().cloned().collect(),
                None => vec![node.id.clone()],
            };
            let mut record = Record::new();
            record.insert("pid".to_string(), json!(node.id));
            record.insert("name".to_string(), json!(node.label));
            record.insert("synonym".to_string(), json!(node.synonyms));
            record.insert("relatives".to_string(), json!(relatives));
            record.insert("createdAt".to_string(), json!(created_at));
            record
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWL: &str = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:owl="http://www.w3.org/2002/07/owl#"
         xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:rdfs="http://www.w3.org/2000/01/rdf-schema#"
         xmlns:skos="http://www.w3.org/2004/02/skos/core#">
  <owl:Class rdf:about="http://purl.org/pan-science/PaNET/PaNET01000">
    <rdfs:label>  x-ray
      probe </rdfs:label>
  </owl:Class>
  <owl:Class rdf:about="http://purl.org/pan-science/PaNET/PaNET01012">
    <rdfs:subClassOf rdf:resource="http://purl.org/pan-science/PaNET/PaNET01000"/>
    <rdfs:label>x-ray diffraction</rdfs:label>
    <skos:altLabel>XRD</skos:altLabel>
  </owl:Class>
  <owl:Class rdf:about="http://purl.org/pan-science/PaNET/PaNET01100">
    <rdfs:subClassOf rdf:resource="http://purl.org/pan-science/PaNET/PaNET01012"/>
  </owl:Class>
</rdf:RDF>"#;

    #[test]
    fn parses_owl_classes() {
        let nodes = parse_owl(OWL).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].label, "x-ray probe");
        assert_eq!(nodes[1].synonyms, vec!["XRD".to_string()]);
        assert_eq!(nodes[2].label, "PaNET01100");
        assert_eq!(
            nodes[0].child_ids,
            vec!["http://purl.org/pan-science/PaNET/PaNET01012".to_string()]
        );
    }

    #[test]
    fn relatives_are_descendants_or_self() {
        let nodes = parse_owl(OWL).unwrap();
        let graph = OntologyGraph::build(nodes, LeafRule::NotAParent);
        let root = "http://purl.org/pan-science/PaNET/PaNET01000";
        assert_eq!(graph.leaves().len(), 1);
        assert_eq!(graph.roots(), &[root.to_string()]);
        assert_eq!(graph.relatives(root).map(BTreeSet::len), Some(3));
        assert_eq!(
            graph.id_for_synonym("XRD"),
            Some("http://purl.org/pan-science/PaNET/PaNET01012")
        );
        let records: Vec<Record> = graph.records(7).collect();
        assert_eq!(records[0]["createdAt"], json!(7));
    }

    #[test]
    fn bioportal_parents_without_labels_become_roots() {
        let page = json!({
            "pageCount": 2,
            "collection": [
                {"@id": "1", "prefLabel": "a", "synonym": [], "children": [{"@id": "2"}],
                 "parents": [{"@id": "root", "prefLabel": null}]},
                {"@id": "2", "prefLabel": " b ", "synonym": ["bee"], "children": [],
                 "parents": [{"@id": "1", "prefLabel": "a"}]}
            ]
        });
        let (nodes, pages) = parse_bioportal_page(&page).unwrap();
        assert_eq!(pages, 2);
        assert!(nodes[0].parent_ids.is_empty());
        assert_eq!(nodes[1].parent_ids, vec!["1".to_string()]);
        assert_eq!(nodes[1].label, "b");

        let graph = OntologyGraph::build(nodes, LeafRule::NoChildren);
        let expected: BTreeSet<String> = ["1", "2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(graph.relatives("1"), Some(&expected));
    }
}
