use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use tempfile::Builder;

use crate::error::BridgeError;

pub type Record = Map<String, Value>;

/// A catalog-dialect query evaluated by a [`RecordStore`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub where_clause: Option<Value>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn first() -> Self {
        Self {
            limit: Some(1),
            ..Self::default()
        }
    }

    pub fn matching(where_clause: Value) -> Self {
        Self {
            where_clause: Some(where_clause),
            ..Self::default()
        }
    }

    fn apply(&self, records: &[Record]) -> Vec<Record> {
        records
            .iter()
            .filter(|record| match &self.where_clause {
                Some(where_clause) => matches_record(where_clause, record),
                None => true,
            })
            .skip(self.skip.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Generic upsert/find/expire storage keyed by collection name.
pub trait RecordStore: Send + Sync {
    fn upsert(&self, collection: &str, record: Record) -> Result<(), BridgeError>;

    fn upsert_many(
        &self,
        collection: &str,
        records: &mut dyn Iterator<Item = Record>,
    ) -> Result<usize, BridgeError> {
        let mut count = 0;
        for record in records {
            self.upsert(collection, record)?;
            count += 1;
        }
        Ok(count)
    }

    fn find(&self, collection: &str, query: &Query) -> Result<Vec<Record>, BridgeError>;

    /// Removes every record matching `where_clause` (all records when `None`).
    fn destroy_all(
        &self,
        collection: &str,
        where_clause: Option<&Value>,
    ) -> Result<usize, BridgeError>;
}

fn upsert_into(records: &mut Vec<Record>, record: Record) {
    let existing = record.get("pid").and_then(|pid| {
        records
            .iter()
            .position(|stored| stored.get("pid") == Some(pid))
    });
    match existing {
        Some(index) => records[index] = record,
        None => records.push(record),
    }
}

fn retain_unmatched(records: &mut Vec<Record>, where_clause: Option<&Value>) -> usize {
    let before = records.len();
    match where_clause {
        Some(where_clause) => records.retain(|record| !matches_record(where_clause, record)),
        None => records.clear(),
    }
    before - records.len()
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        action: impl FnOnce(&mut Vec<Record>) -> T,
    ) -> Result<T, BridgeError> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|_| BridgeError::Store("memory store lock poisoned".to_string()))?;
        Ok(action(guard.entry(collection.to_string()).or_default()))
    }
}

impl RecordStore for MemoryStore {
    fn upsert(&self, collection: &str, record: Record) -> Result<(), BridgeError> {
        self.with_collection(collection, |records| upsert_into(records, record))
    }

    fn find(&self, collection: &str, query: &Query) -> Result<Vec<Record>, BridgeError> {
        self.with_collection(collection, |records| query.apply(records))
    }

    fn destroy_all(
        &self,
        collection: &str,
        where_clause: Option<&Value>,
    ) -> Result<usize, BridgeError> {
        self.with_collection(collection, |records| retain_unmatched(records, where_clause))
    }
}

/// One JSON array file per collection, rewritten atomically.
#[derive(Debug)]
pub struct JsonFileStore {
    root: Utf8PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new() -> Result<Self, BridgeError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.cache_dir().join("search-bridge")).ok()
            })
            .ok_or_else(|| BridgeError::Store("unable to resolve cache directory".to_string()))?;
        Ok(Self::new_with_root(root))
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self {
            root,
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn collection_path(&self, collection: &str) -> Utf8PathBuf {
        self.root.join(format!("{collection}.json"))
    }

    fn read(&self, collection: &str) -> Result<Vec<Record>, BridgeError> {
        let path = self.collection_path(collection);
        if !path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| BridgeError::Store(err.to_string()))?;
        serde_json::from_str(&content).map_err(|err| BridgeError::Store(err.to_string()))
    }

    fn write(&self, collection: &str, records: &[Record]) -> Result<(), BridgeError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| BridgeError::Store(err.to_string()))?;
        let content =
            serde_json::to_vec(records).map_err(|err| BridgeError::Store(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("search-bridge-store")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| BridgeError::Store(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| BridgeError::Store(err.to_string()))?;
        temp.persist(self.collection_path(collection).as_std_path())
            .map_err(|err| BridgeError::Store(err.to_string()))?;
        Ok(())
    }

    fn modify<T>(
        &self,
        collection: &str,
        action: impl FnOnce(&mut Vec<Record>) -> T,
    ) -> Result<T, BridgeError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| BridgeError::Store("file store lock poisoned".to_string()))?;
        let mut records = self.read(collection)?;
        let result = action(&mut records);
        self.write(collection, &records)?;
        Ok(result)
    }
}

impl RecordStore for JsonFileStore {
    fn upsert(&self, collection: &str, record: Record) -> Result<(), BridgeError> {
        self.modify(collection, |records| upsert_into(records, record))
    }

    fn upsert_many(
        &self,
        collection: &str,
        incoming: &mut dyn Iterator<Item = Record>,
    ) -> Result<usize, BridgeError> {
        self.modify(collection, |records| {
            let mut count = 0;
            for record in incoming {
                upsert_into(records, record);
                count += 1;
            }
            count
        })
    }

    fn find(&self, collection: &str, query: &Query) -> Result<Vec<Record>, BridgeError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| BridgeError::Store("file store lock poisoned".to_string()))?;
        Ok(query.apply(&self.read(collection)?))
    }

    fn destroy_all(
        &self,
        collection: &str,
        where_clause: Option<&Value>,
    ) -> Result<usize, BridgeError> {
        self.modify(collection, |records| retain_unmatched(records, where_clause))
    }
}

const OPERATORS: &[&str] = &[
    "eq", "neq", "gt", "gte", "lt", "lte", "between", "inq", "nin", "like", "nlike", "ilike",
    "nilike",
];

pub fn matches_record(where_clause: &Value, record: &Record) -> bool {
    match where_clause {
        Value::Object(conditions) => conditions.iter().all(|(key, condition)| {
            match key.as_str() {
                "and" => condition
                    .as_array()
                    .is_some_and(|items| items.iter().all(|item| matches_record(item, record))),
                "or" => condition
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| matches_record(item, record))),
                path => field_matches(&resolve_path(record, path), condition),
            }
        }),
        _ => false,
    }
}

/// Evaluates a catalog-dialect where clause against a JSON object.
pub fn matches(where_clause: &Value, value: &Value) -> bool {
    match value {
        Value::Object(record) => matches_record(where_clause, record),
        _ => false,
    }
}

/// Values at a dotted path; arrays along the way and at the end are flattened.
fn resolve_path<'a>(record: &'a Record, path: &str) -> Vec<&'a Value> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Vec::new();
    };
    let mut current: Vec<&Value> = record.get(first).into_iter().collect();
    for segment in segments {
        current = current
            .into_iter()
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().filter_map(|item| item.get(segment)).collect(),
                other => other.get(segment).into_iter().collect::<Vec<_>>(),
            })
            .collect();
    }
    current
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

fn field_matches(values: &[&Value], condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|key| OPERATORS.contains(&key.as_str())) => {
            ops.iter().all(|(op, operand)| operator_matches(values, op, operand))
        }
        _ => values.iter().any(|value| loosely_equal(value, condition)),
    }
}

fn operator_matches(values: &[&Value], op: &str, operand: &Value) -> bool {
    let any = |predicate: &dyn Fn(&Value) -> bool| values.iter().any(|value| predicate(value));
    match op {
        "eq" => any(&|value| loosely_equal(value, operand)),
        "neq" => !any(&|value| loosely_equal(value, operand)),
        "gt" => any(&|value| compare(value, operand).is_some_and(|ord| ord.is_gt())),
        "gte" => any(&|value| compare(value, operand).is_some_and(|ord| ord.is_ge())),
        "lt" => any(&|value| compare(value, operand).is_some_and(|ord| ord.is_lt())),
        "lte" => any(&|value| compare(value, operand).is_some_and(|ord| ord.is_le())),
        "between" => match operand.as_array().map(Vec::as_slice) {
            Some([low, high]) => any(&|value| {
                compare(value, low).is_some_and(|ord| ord.is_ge())
                    && compare(value, high).is_some_and(|ord| ord.is_le())
            }),
            _ => false,
        },
        "inq" => operand.as_array().is_some_and(|list| {
            any(&|value| list.iter().any(|item| loosely_equal(value, item)))
        }),
        "nin" => operand.as_array().is_none_or(|list| {
            !any(&|value| list.iter().any(|item| loosely_equal(value, item)))
        }),
        "like" | "ilike" | "nlike" | "nilike" => {
            let insensitive = op.contains("ilike");
            let negated = op.starts_with('n');
            let Some(regex) = operand.as_str().and_then(|pattern| like_regex(pattern, insensitive))
            else {
                return false;
            };
            let hit = any(&|value| value.as_str().is_some_and(|text| regex.is_match(text)));
            hit != negated
        }
        _ => false,
    }
}

fn like_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let source = if pattern.contains('%') {
        let escaped: Vec<String> = pattern.split('%').map(regex::escape).collect();
        format!("^{}$", escaped.join(".*"))
    } else {
        pattern.to_string()
    };
    RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .build()
        .ok()
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) if left.is_number() && right.is_number() => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }

    #[test]
    fn dotted_paths_reach_into_arrays() {
        let dataset = record(json!({
            "techniques": [{"pid": "t1"}, {"pid": "t2"}],
            "pidArray": ["a", "b"]
        }));
        assert!(matches_record(&json!({"techniques.pid": {"inq": ["t2"]}}), &dataset));
        assert!(matches_record(&json!({"pidArray": "b"}), &dataset));
        assert!(!matches_record(&json!({"techniques.pid": {"nin": ["t1"]}}), &dataset));
    }

    #[test]
    fn operators_and_booleans() {
        let item = record(json!({"size": 10, "name": "X-ray diffraction"}));
        assert!(matches_record(&json!({"size": {"between": [5, 10]}}), &item));
        assert!(matches_record(
            &json!({"or": [{"size": {"gt": 100}}, {"name": {"ilike": "%ray%"}}]}),
            &item
        ));
        assert!(!matches_record(
            &json!({"and": [{"size": {"lt": 5}}, {"name": "X-ray diffraction"}]}),
            &item
        ));
        assert!(matches_record(&json!({"missing": {"neq": 1}}), &item));
    }

    #[test]
    fn memory_store_upserts_by_pid() {
        let store = MemoryStore::new();
        store.upsert("c", record(json!({"pid": "1", "v": 1}))).unwrap();
        store.upsert("c", record(json!({"pid": "1", "v": 2}))).unwrap();
        store.upsert("c", record(json!({"pid": "2", "v": 3}))).unwrap();
        let all = store.find("c", &Query::all()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["v"], json!(2));
        let first = store.find("c", &Query::first()).unwrap();
        assert_eq!(first.len(), 1);
        let removed = store.destroy_all("c", Some(&json!({"v": {"gte": 3}}))).unwrap();
        assert_eq!(removed, 1);
    }
}
