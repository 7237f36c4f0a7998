//! Filling the store: reproducible synthetic filings for development, and
//! CSV exports of the dataset.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{Duration, NaiveDateTime, NaiveTime, Utc};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::datatype::{self, Decimal};
use crate::error::{FilingsError, Result};
use crate::persist::SqliteStore;
use crate::schema::{self, Field, JobFiling};

/// Records are written in chunks of this many per transaction.
pub const CHUNK_SIZE: usize = 1000;

const BOROUGHS: [&str; 5] = ["MANHATTAN", "BROOKLYN", "QUEENS", "BRONX", "STATEN ISLAND"];
const JOB_TYPES: [&str; 5] = ["NB", "A1", "A2", "DM", "PA"];
const JOB_STATUSES: [&str; 5] = ["APPROVED", "PENDING", "REJECTED", "IN PROCESS", "COMPLETED"];
const BUILDING_TYPES: [&str; 2] = ["1-2-3 FAMILY", "OTHERS"];
const OWNER_TYPES: [&str; 4] = ["INDIVIDUAL", "CORPORATION", "PARTNERSHIP", "CONDO/CO-OP"];
const STREETS: [&str; 6] = ["BROADWAY", "ATLANTIC AVENUE", "QUEENS BLVD", "GRAND CONCOURSE", "VICTORY BLVD", "5 AVENUE"];

fn money(rng: &mut SmallRng, low: i64, high: i64) -> Decimal {
    let whole = rng.gen_range(low..high);
    let cents = rng.gen_range(0..100u32);
    Decimal::from_str(&format!("{}.{:02}", whole, cents)).unwrap_or_else(|| Decimal::from(whole))
}

/// Builds `count` plausible filings with ids `TEST000000`, `TEST000001`, ...
/// The same seed always yields the same records, apart from dates, which are
/// spread over the year before today.
pub fn synthetic_filings(count: usize, seed: u64) -> Vec<JobFiling> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let base: NaiveDateTime = (Utc::now().date_naive() - Duration::days(365)).and_time(NaiveTime::default());
    (0..count)
        .map(|i| {
            let mut filing = JobFiling::new(format!("TEST{:06}", i));
            let borough = BOROUGHS[rng.gen_range(0..BOROUGHS.len())];
            let status = JOB_STATUSES[rng.gen_range(0..JOB_STATUSES.len())];
            let filed = base + Duration::days(rng.gen_range(0..365));
            let latest = filed + Duration::days(rng.gen_range(0..60));
            let existing_units = rng.gen_range(0..40i64);
            let existing_stories = rng.gen_range(1..30i64);

            filing.borough = Some(borough.to_string());
            filing.house_no = Some(rng.gen_range(1..2000u32).to_string());
            filing.street_name = Some(STREETS[rng.gen_range(0..STREETS.len())].to_string());
            filing.block = Some(format!("{:05}", rng.gen_range(1..16000u32)));
            filing.lot = Some(format!("{:04}", rng.gen_range(1..200u32)));
            filing.zip_code = Some(rng.gen_range(10001..11698u32).to_string());
            filing.building_type = Some(BUILDING_TYPES[rng.gen_range(0..BUILDING_TYPES.len())].to_string());
            filing.job_type = Some(JOB_TYPES[rng.gen_range(0..JOB_TYPES.len())].to_string());
            filing.job_status = Some(status.to_string());
            filing.job_status_description = Some(format!("{} BY DOB", status));
            filing.filing_date = Some(filed);
            filing.latest_action_date = Some(latest);
            filing.approved_date = (status == "APPROVED").then_some(latest);
            filing.fully_paid = rng.gen_bool(0.8).then_some(filed).map(|d| d.format("%m/%d/%Y").to_string());
            filing.initial_cost = Some(money(&mut rng, 1000, 5_000_000));
            filing.total_estimated_fee = Some(money(&mut rng, 100, 50_000));
            filing.fee_status = Some(if rng.gen_bool(0.9) { "STANDARD" } else { "EXEMPT" }.to_string());
            filing.existing_dwelling_units = Some(existing_units);
            filing.proposed_dwelling_units = Some(existing_units + rng.gen_range(0..20));
            filing.existing_occupancy = Some("R-2".to_string());
            filing.proposed_occupancy = Some("R-2".to_string());
            filing.existing_stories = Some(existing_stories);
            filing.proposed_stories = Some(existing_stories + rng.gen_range(0..3));
            filing.existing_zoning_square_feet = Some(money(&mut rng, 500, 100_000));
            filing.proposed_zoning_square_feet = Some(money(&mut rng, 500, 120_000));
            filing.owner_type = Some(OWNER_TYPES[rng.gen_range(0..OWNER_TYPES.len())].to_string());
            filing.owner_name = Some(format!("OWNER {}", rng.gen_range(1..5000u32)));
            filing.city_state_zip = Some(format!("{}, NY", borough));
            filing
        })
        .collect()
}

/// Generates synthetic filings and stores the new ones, returning how many
/// were added.
pub fn generate_test_data(store: &SqliteStore, count: usize, seed: u64) -> Result<usize> {
    let filings = synthetic_filings(count, seed);
    let mut inserted = 0;
    for chunk in filings.chunks(CHUNK_SIZE) {
        inserted += store.insert_new(chunk)?;
        debug!(inserted, of = count, "synthetic chunk saved");
    }
    info!(generated = count, inserted, seed, "synthetic job filings stored");
    Ok(inserted)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Data rows read from the file.
    pub read: usize,
    /// Rows that were new to the store.
    pub inserted: usize,
}

pub fn import_csv(store: &SqliteStore, path: impl AsRef<Path>) -> Result<ImportSummary> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let summary = import_csv_reader(store, file)?;
    info!(path = %path.display(), read = summary.read, inserted = summary.inserted, "csv import finished");
    Ok(summary)
}

/// Reads a CSV export with a header row. Headers are matched against field
/// names, column names and JSON keys; unknown columns are ignored. Cells that
/// do not parse for their field are stored as null.
pub fn import_csv_reader<R: Read>(store: &SqliteStore, reader: R) -> Result<ImportSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns: Vec<Option<&'static Field>> = reader.headers()?.iter().map(schema::field).collect();
    if !columns.iter().flatten().any(|field| field.is_primary_key()) {
        return Err(FilingsError::InvalidRecord {
            message: format!("no {} column in header", schema::PRIMARY_KEY_COLUMN),
            row: Some(1),
        });
    }
    for (header, field) in reader.headers()?.iter().zip(&columns) {
        if field.is_none() {
            warn!(column = header, "ignoring unknown csv column");
        }
    }

    let mut summary = ImportSummary::default();
    let mut chunk = Vec::with_capacity(CHUNK_SIZE);
    for (index, row) in reader.records().enumerate() {
        // header is line 1
        let line = index as u64 + 2;
        let row = row?;
        let mut filing = JobFiling::default();
        for (cell, field) in row.iter().zip(&columns) {
            if let Some(field) = field {
                field.assign(&mut filing, datatype::parse_cell(cell, field.field_type));
            }
        }
        if filing.job_s1_no.is_empty() {
            return Err(FilingsError::InvalidRecord {
                message: format!("missing {}", schema::PRIMARY_KEY_COLUMN),
                row: Some(line),
            });
        }
        chunk.push(filing);
        summary.read += 1;
        if chunk.len() == CHUNK_SIZE {
            summary.inserted += store.insert_new(&chunk)?;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        summary.inserted += store.insert_new(&chunk)?;
    }
    Ok(summary)
}
