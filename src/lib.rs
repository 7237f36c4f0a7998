//! Filingscope – filtered, paginated and progressively streamed browsing of the
//! NYC Department of Buildings job application filings dataset.
//!
//! A caller describes what it wants as a list of `(field, operator, value)`
//! conditions. These are turned into a typed [`filter::Predicate`], which the
//! [`query::QueryService`] evaluates against a [`store::RecordStore`] either
//! one page at a time or as a lazy sequence of batches. For large result sets
//! the [`loading::ProgressiveLoader`] runs a background session that delivers
//! a small first batch right away and the rest in larger batches, reporting
//! progress and allowing cancellation by id.
//!
//! ## Modules
//! * [`schema`] – The [`schema::JobFiling`] record and the static field table.
//! * [`datatype`] – Field types, typed values and coercion of untyped input.
//! * [`filter`] – Conditions, filter sets and predicate building.
//! * [`store`] – The record store seam and an in-memory store.
//! * [`persist`] – SQLite store with predicate pushdown.
//! * [`query`] – Pages, batch sequences and distinct values.
//! * [`loading`] – Progressive loading sessions.
//! * [`import`] – Synthetic data and CSV import.
//! * [`preferences`] – Saved filter sets and column preferences.
//! * [`config`] – Layered settings.
//! * [`server`] – HTTP and WebSocket API.
//!
//! ## Filtering
//! Conditions are combined with AND. A condition that cannot be applied (an
//! unknown field, an unknown operator, `contains` on a non-string field, a
//! value that does not convert to the field's type) never matches, so the
//! whole filter then matches nothing. Null fields never match any operator.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use filingscope::filter::{self, FilterCondition};
//! use filingscope::query::QueryService;
//! use filingscope::schema::JobFiling;
//! use filingscope::store::MemoryStore;
//!
//! let store = MemoryStore::from_records((0..25).map(|i| {
//!     let mut filing = JobFiling::new(format!("J{:03}", i));
//!     filing.borough = Some("BROOKLYN".to_string());
//!     filing
//! }));
//! let queries = QueryService::new(Arc::new(store));
//! let predicate = filter::build(&[FilterCondition::new("Borough", "eq", "BROOKLYN")]);
//! let page = queries.get_page(2, 10, Some(&predicate)).unwrap();
//! assert_eq!(page.items.len(), 10);
//! assert_eq!(page.total_count, 25);
//! ```

pub mod config;
pub mod datatype;
pub mod error;
pub mod filter;
pub mod import;
pub mod loading;
pub mod persist;
pub mod preferences;
pub mod query;
pub mod schema;
pub mod server;
pub mod store;
