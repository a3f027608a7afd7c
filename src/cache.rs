use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::BridgeError;
use crate::store::{Query, Record, RecordStore};

pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

/// Result of a cache read: either the matching records or an eviction of
/// everything the query's `where` selected.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(Vec<Record>),
    Evicted,
}

impl CacheLookup {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            CacheLookup::Fresh(records) => records,
            CacheLookup::Evicted => Vec::new(),
        }
    }
}

/// Age-evicted cache over a [`RecordStore`] collection. Records carry their
/// own `createdAt` (epoch milliseconds) and an optional `ttl` in seconds.
#[derive(Clone)]
pub struct RecordCache {
    store: Arc<dyn RecordStore>,
    collection: String,
    default_ttl: u64,
}

impl RecordCache {
    pub fn new(store: Arc<dyn RecordStore>, collection: impl Into<String>, default_ttl: u64) -> Self {
        Self {
            store,
            collection: collection.into(),
            default_ttl,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    pub fn set<I>(&self, records: I, ttl: Option<u64>) -> Result<usize, BridgeError>
    where
        I: IntoIterator<Item = Record>,
    {
        self.set_at(records, ttl, now_millis())
    }

    /// Upserts `records`, stamping `createdAt` on those without one.
    pub fn set_at<I>(&self, records: I, ttl: Option<u64>, now_ms: i64) -> Result<usize, BridgeError>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut stamped = records.into_iter().map(|mut record| {
            record
                .entry("createdAt")
                .or_insert_with(|| Value::from(now_ms));
            if let Some(ttl) = ttl {
                record.insert("ttl".to_string(), Value::from(ttl));
            }
            record
        });
        self.store.upsert_many(&self.collection, &mut stamped)
    }

    /// Drops every cached record, then stores `records`.
    pub fn replace_all<I>(&self, records: I, ttl: Option<u64>) -> Result<usize, BridgeError>
    where
        I: IntoIterator<Item = Record>,
    {
        let removed = self.store.destroy_all(&self.collection, None)?;
        debug!(collection = %self.collection, removed, "cleared cache collection");
        self.set(records, ttl)
    }

    pub fn get(&self, query: &Query) -> Result<Vec<Record>, BridgeError> {
        self.get_at(query, now_millis())
    }

    pub fn get_at(&self, query: &Query, now_ms: i64) -> Result<Vec<Record>, BridgeError> {
        self.lookup_at(query, now_ms).map(CacheLookup::into_records)
    }

    pub fn lookup(&self, query: &Query) -> Result<CacheLookup, BridgeError> {
        self.lookup_at(query, now_millis())
    }

    /// Returns the matching records unless the first one has outlived its
    /// ttl, in which case every record matching the query's `where` is removed.
    pub fn lookup_at(&self, query: &Query, now_ms: i64) -> Result<CacheLookup, BridgeError> {
        let records = self.store.find(&self.collection, query)?;
        let Some(first) = records.first() else {
            return Ok(CacheLookup::Fresh(records));
        };
        if self.is_stale(first, now_ms) {
            let removed = self
                .store
                .destroy_all(&self.collection, query.where_clause.as_ref())?;
            debug!(collection = %self.collection, removed, "evicted stale cache records");
            return Ok(CacheLookup::Evicted);
        }
        Ok(CacheLookup::Fresh(records))
    }

    fn is_stale(&self, record: &Record, now_ms: i64) -> bool {
        let Some(created_at) = record.get("createdAt").and_then(Value::as_i64) else {
            return false;
        };
        let ttl = record
            .get("ttl")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_ttl);
        created_at.saturating_add((ttl as i64).saturating_mul(1000)) < now_ms
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
