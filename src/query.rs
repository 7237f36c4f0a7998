//! Page based and batch based retrieval over a [`RecordStore`].
//!
//! Store errors are returned unchanged; retrying is left to the store.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::datatype::Value;
use crate::error::{FilingsError, Result};
use crate::filter::Predicate;
use crate::loading::CancelToken;
use crate::schema::{self, JobFiling};
use crate::store::RecordStore;

pub const DEFAULT_DISTINCT_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<JobFiling>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
}

pub struct QueryService<S> {
    store: Arc<S>,
}
impl<S> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store) }
    }
}

impl<S: RecordStore> QueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the one-based `page` of matching records together with the
    /// total number of matches. Pages past the end are empty.
    pub fn get_page(&self, page: usize, page_size: usize, predicate: Option<&Predicate>) -> Result<Page> {
        if page == 0 {
            return Err(FilingsError::InvalidArgument("page numbers start at 1".into()));
        }
        if page_size == 0 {
            return Err(FilingsError::InvalidArgument("page size must be positive".into()));
        }
        let all = Predicate::All;
        let predicate = predicate.unwrap_or(&all);
        let total_count = self.store.count(predicate)?;
        let offset = (page - 1).saturating_mul(page_size);
        let items = if offset >= total_count {
            Vec::new()
        } else {
            self.store.slice(predicate, offset, page_size)?
        };
        Ok(Page { items, total_count, page, page_size })
    }

    /// Counts the matches once and returns a lazy sequence of
    /// `ceil(total / batch_size)` consecutive slices. The sequence stops
    /// early, without error, once `cancel` fires.
    pub fn batches(
        &self,
        batch_size: usize,
        predicate: Option<Predicate>,
        cancel: Option<CancelToken>,
    ) -> Result<Batches<S>> {
        if batch_size == 0 {
            return Err(FilingsError::InvalidArgument("batch size must be positive".into()));
        }
        let predicate = predicate.unwrap_or_default();
        let total = self.store.count(&predicate)?;
        Ok(Batches {
            store: Arc::clone(&self.store),
            predicate,
            batch_size,
            total,
            offset: 0,
            cancel,
        })
    }

    /// Up to `limit` distinct non-null values of a field, for filter value
    /// suggestions.
    pub fn distinct_values(&self, field_name: &str, limit: usize) -> Result<BTreeSet<Value>> {
        let field = schema::field(field_name)
            .ok_or_else(|| FilingsError::UnknownField(field_name.to_string()))?;
        Ok(self.store.distinct(field, limit)?.into_iter().collect())
    }
}

/// Lazy batch sequence produced by [`QueryService::batches`]. Not resumable:
/// once exhausted, cancelled or failed it stays finished.
pub struct Batches<S> {
    store: Arc<S>,
    predicate: Predicate,
    batch_size: usize,
    total: usize,
    offset: usize,
    cancel: Option<CancelToken>,
}

impl<S> Batches<S> {
    /// Starts the sequence at a record offset instead of the first record.
    pub fn starting_at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
    pub fn total_count(&self) -> usize {
        self.total
    }
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
    pub fn remaining_batches(&self) -> usize {
        self.total.saturating_sub(self.offset).div_ceil(self.batch_size)
    }
    fn finish(&mut self) {
        self.offset = self.total;
    }
}

impl<S: RecordStore> Iterator for Batches<S> {
    type Item = Result<Vec<JobFiling>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.total {
            return None;
        }
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            debug!(offset = self.offset, total = self.total, "batch sequence cancelled");
            self.finish();
            return None;
        }
        match self.store.slice(&self.predicate, self.offset, self.batch_size) {
            Ok(batch) => {
                self.offset = self.offset.saturating_add(self.batch_size).min(self.total);
                Some(Ok(batch))
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining_batches()))
    }
}
