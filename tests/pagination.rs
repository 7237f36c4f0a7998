use std::sync::Arc;

use filingscope::datatype::Value;
use filingscope::error::FilingsError;
use filingscope::filter::{self, FilterCondition};
use filingscope::loading::CancelToken;
use filingscope::query::QueryService;
use filingscope::schema::JobFiling;
use filingscope::store::MemoryStore;

fn filings(count: usize) -> Vec<JobFiling> {
    (0..count)
        .map(|i| {
            let mut filing = JobFiling::new(format!("J{:05}", i));
            filing.borough = Some(if i % 2 == 0 { "BROOKLYN" } else { "QUEENS" }.to_string());
            filing.job_type = Some(["NB", "A1", "A2"][i % 3].to_string());
            filing
        })
        .collect()
}

fn setup(count: usize) -> QueryService<MemoryStore> {
    QueryService::new(Arc::new(MemoryStore::from_records(filings(count))))
}

fn ids(records: &[JobFiling]) -> Vec<String> {
    records.iter().map(|r| r.job_s1_no.clone()).collect()
}

#[test]
fn pages_over_twenty_five_records() {
    let queries = setup(25);
    let expected_sizes = [10, 10, 5, 0];
    for (index, expected) in expected_sizes.iter().enumerate() {
        let page = queries.get_page(index + 1, 10, None).expect("page");
        assert_eq!(page.items.len(), *expected, "page {}", index + 1);
        assert_eq!(page.total_count, 25, "total is reported on every page");
    }
    let second = queries.get_page(2, 10, None).expect("page 2");
    let expected: Vec<String> = (10..20).map(|i| format!("J{:05}", i)).collect();
    assert_eq!(ids(&second.items), expected, "page 2 holds records 10..20 in key order");
}

#[test]
fn pages_respect_the_filter() {
    let queries = setup(25);
    let predicate = filter::build(&[FilterCondition::new("Borough", "eq", "BROOKLYN")]);
    let page = queries.get_page(1, 100, Some(&predicate)).expect("page");
    assert_eq!(page.total_count, 13);
    assert!(page.items.iter().all(|r| r.borough.as_deref() == Some("BROOKLYN")));
}

#[test]
fn invalid_page_arguments() {
    let queries = setup(5);
    assert!(matches!(queries.get_page(0, 10, None), Err(FilingsError::InvalidArgument(_))));
    assert!(matches!(queries.get_page(1, 0, None), Err(FilingsError::InvalidArgument(_))));
    assert!(matches!(queries.batches(0, None, None), Err(FilingsError::InvalidArgument(_))));
}

#[test]
fn batches_cover_every_record_once() {
    let queries = setup(20);
    let batches = queries.batches(7, None, None).expect("batches");
    assert_eq!(batches.total_count(), 20);
    assert_eq!(batches.remaining_batches(), 3);
    let collected: Vec<Vec<JobFiling>> = batches.map(|b| b.expect("batch")).collect();
    let sizes: Vec<usize> = collected.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![7, 7, 6]);
    let all: Vec<String> = collected.iter().flat_map(|b| ids(b)).collect();
    let expected: Vec<String> = (0..20).map(|i| format!("J{:05}", i)).collect();
    assert_eq!(all, expected, "batches are consecutive and in order");
}

#[test]
fn batches_of_an_empty_result() {
    let queries = setup(20);
    let predicate = filter::build(&[FilterCondition::new("Borough", "eq", "BRONX")]);
    let mut batches = queries.batches(5, Some(predicate), None).expect("batches");
    assert_eq!(batches.total_count(), 0);
    assert!(batches.next().is_none());
}

#[test]
fn batches_starting_at_an_offset() {
    let queries = setup(20);
    let sizes: Vec<usize> = queries
        .batches(5, None, None)
        .expect("batches")
        .starting_at(3)
        .map(|b| b.expect("batch").len())
        .collect();
    assert_eq!(sizes, vec![5, 5, 5, 2]);
}

#[test]
fn oversized_batches_end_after_one_slice() {
    let queries = setup(20);
    let mut batches = queries.batches(usize::MAX, None, None).expect("batches").starting_at(3);
    assert_eq!(batches.remaining_batches(), 1);
    let first = batches.next().expect("one batch").expect("no error");
    assert_eq!(ids(&first).first().map(String::as_str), Some("J00003"));
    assert_eq!(first.len(), 17);
    assert!(batches.next().is_none(), "offset stays at the end instead of wrapping");
    assert_eq!(batches.remaining_batches(), 0);
}

#[test]
fn cancelled_batches_stop() {
    let queries = setup(20);
    let cancel = CancelToken::new();
    let mut batches = queries.batches(5, None, Some(cancel.clone())).expect("batches");
    assert_eq!(batches.next().map(|b| b.map(|r| r.len()).ok()), Some(Some(5)));
    cancel.cancel();
    assert!(batches.next().is_none(), "no batch after cancellation");
    assert!(batches.next().is_none(), "still finished");
}

#[test]
fn distinct_values_are_limited() {
    let queries = setup(30);
    let all = queries.distinct_values("JobType", 100).expect("distinct");
    let expected: Vec<Value> = ["A1", "A2", "NB"].iter().map(|s| Value::String(s.to_string())).collect();
    assert_eq!(all.into_iter().collect::<Vec<_>>(), expected);
    let limited = queries.distinct_values("JOB_TYPE", 2).expect("distinct");
    assert_eq!(limited.len(), 2);
    assert!(matches!(queries.distinct_values("Nope", 10), Err(FilingsError::UnknownField(_))));
}

#[test]
fn memory_store_keeps_one_record_per_key() {
    let store = MemoryStore::new();
    assert!(store.is_empty().expect("is_empty"));
    assert!(store.insert(JobFiling::new("K1")).expect("insert"));
    assert!(!store.insert(JobFiling::new("K1")).expect("insert again"), "known key is skipped");
    assert_eq!(store.len().expect("len"), 1);
    assert!(!store.is_empty().expect("is_empty"));
}
