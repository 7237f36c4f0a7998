//! The record store seam. The query service only needs counting, ordered
//! slicing and distinct values under a predicate; [`MemoryStore`] provides
//! them over an in-memory map and [`crate::persist::SqliteStore`] pushes them
//! down into SQLite.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::datatype::Value;
use crate::error::{FilingsError, Result};
use crate::filter::Predicate;
use crate::schema::{Field, JobFiling};

pub trait RecordStore: Send + Sync + 'static {
    /// Number of records matching the predicate.
    fn count(&self, predicate: &Predicate) -> Result<usize>;
    /// Matching records ordered by primary key, skipping `offset`, at most `limit`.
    fn slice(&self, predicate: &Predicate, offset: usize, limit: usize) -> Result<Vec<JobFiling>>;
    /// Up to `limit` distinct non-null values of a field.
    fn distinct(&self, field: &'static Field, limit: usize) -> Result<Vec<Value>>;
}

/// Records kept in primary key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, JobFiling>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn from_records<I: IntoIterator<Item = JobFiling>>(records: I) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.job_s1_no.clone(), r))
            .collect();
        Self { records: RwLock::new(records) }
    }
    /// Inserts the record unless its primary key is already kept.
    pub fn insert(&self, record: JobFiling) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|e| FilingsError::Lock(e.to_string()))?;
        if records.contains_key(&record.job_s1_no) {
            return Ok(false);
        }
        records.insert(record.job_s1_no.clone(), record);
        Ok(true)
    }
    pub fn len(&self) -> Result<usize> {
        let records = self
            .records
            .read()
            .map_err(|e| FilingsError::Lock(e.to_string()))?;
        Ok(records.len())
    }
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl RecordStore for MemoryStore {
    fn count(&self, predicate: &Predicate) -> Result<usize> {
        let records = self
            .records
            .read()
            .map_err(|e| FilingsError::Lock(e.to_string()))?;
        Ok(records.values().filter(|r| predicate.matches(r)).count())
    }
    fn slice(&self, predicate: &Predicate, offset: usize, limit: usize) -> Result<Vec<JobFiling>> {
        let records = self
            .records
            .read()
            .map_err(|e| FilingsError::Lock(e.to_string()))?;
        Ok(records
            .values()
            .filter(|r| predicate.matches(r))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
    fn distinct(&self, field: &'static Field, limit: usize) -> Result<Vec<Value>> {
        let records = self
            .records
            .read()
            .map_err(|e| FilingsError::Lock(e.to_string()))?;
        let mut seen = BTreeSet::new();
        for value in records.values().filter_map(|r| field.value(r)) {
            if seen.len() >= limit {
                break;
            }
            seen.insert(value);
        }
        Ok(seen.into_iter().collect())
    }
}
