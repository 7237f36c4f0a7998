// used for persistence
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params, params_from_iter};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use chrono::NaiveDateTime;

use crate::datatype::{Decimal, FieldType, Value};
use crate::error::{FilingsError, Result};
use crate::filter::{DECIMAL_COMPARE, Predicate};
use crate::schema::{self, Field, JobFiling, PRIMARY_KEY_COLUMN, TABLE};
use crate::store::RecordStore;

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

impl PersistenceMode {
    pub fn from_path(path: Option<&str>) -> Self {
        match path.map(str::trim) {
            None | Some("") | Some(":memory:") => PersistenceMode::InMemory,
            Some(path) => PersistenceMode::File(path.to_string()),
        }
    }
}

// (index name, columns)
const INDEXES: [(&str, &str); 5] = [
    ("IX_JobFilings_LatestActionDate", "\"LATEST_ACTION_DATE\""),
    ("IX_JobFilings_Borough", "\"BOROUGH\""),
    ("IX_JobFilings_JobType_JobStatus", "\"JOB_TYPE\", \"JOB_STATUS\""),
    ("IX_JobFilings_InitialCost", "\"INITIAL_COST\""),
    ("IX_JobFilings_ProposedDwellingUnits", "\"PROPOSED_DWELLING_UNITS\""),
];

fn create_table_sql() -> String {
    let columns: Vec<String> = schema::fields()
        .iter()
        .map(|field| {
            let null = if field.nullable { "null" } else { "not null" };
            format!("\"{}\" {} {}", field.column, field.field_type.sql_type(), null)
        })
        .collect();
    let mut sql = format!(
        "create table if not exists {} (\n    {},\n    constraint PK_{} primary key (\"{}\")\n);\n",
        TABLE,
        columns.join(",\n    "),
        TABLE,
        PRIMARY_KEY_COLUMN
    );
    for (name, columns) in INDEXES {
        sql.push_str(&format!("create index if not exists {} on {} ({});\n", name, TABLE, columns));
    }
    sql
}

// decimal text compared as exact numbers, never through REAL
fn register_functions(connection: &Connection) -> rusqlite::Result<()> {
    connection.create_scalar_function(
        DECIMAL_COMPARE,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let left = ctx.get::<Option<Decimal>>(0)?;
            let right = ctx.get::<Option<Decimal>>(1)?;
            Ok(match (left, right) {
                (Some(left), Some(right)) => Some(left.cmp(&right) as i64),
                _ => None,
            })
        },
    )
}

fn column_list() -> String {
    schema::fields()
        .iter()
        .map(|field| format!("\"{}\"", field.column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Job filings kept in a single SQLite table. Filtering, counting, ordering
/// and paging are pushed down into SQL.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(mode: &PersistenceMode) -> Result<Self> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        register_functions(&connection)?;
        connection.execute_batch(&create_table_sql())?;
        info!(mode = ?mode, "job filing store opened");
        Ok(Self { connection: Mutex::new(connection) })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| FilingsError::Lock(e.to_string()))
    }

    /// Inserts the records whose primary key is not yet stored and returns
    /// how many were added. All records are written in one transaction.
    pub fn insert_new(&self, records: &[JobFiling]) -> Result<usize> {
        let mut connection = self.connection()?;
        let transaction = connection.transaction()?;
        let mut inserted = 0;
        {
            let fields = schema::fields();
            let placeholders = vec!["?"; fields.len()].join(", ");
            let sql = format!(
                "insert or ignore into {} ({}) values ({})",
                TABLE,
                column_list(),
                placeholders
            );
            let mut statement = transaction.prepare_cached(&sql)?;
            for record in records {
                let values = fields.iter().map(|field| field.value(record));
                inserted += statement.execute(params_from_iter(values))?;
            }
        }
        transaction.commit()?;
        debug!(offered = records.len(), inserted, "job filings persisted");
        Ok(inserted)
    }

    pub fn len(&self) -> Result<usize> {
        let connection = self.connection()?;
        let count: i64 = connection.query_row(&format!("select count(*) from {}", TABLE), [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, job_s1_no: &str) -> Result<Option<JobFiling>> {
        let connection = self.connection()?;
        let sql = format!(
            "select {} from {} where \"{}\" = ?",
            column_list(),
            TABLE,
            PRIMARY_KEY_COLUMN
        );
        Ok(connection.query_row(&sql, params![job_s1_no], read_record).optional()?)
    }
}

fn read_value(row: &Row, index: usize, field: &Field) -> rusqlite::Result<Option<Value>> {
    Ok(match field.field_type {
        FieldType::String => row.get::<_, Option<String>>(index)?.map(Value::String),
        FieldType::Integer => row.get::<_, Option<i64>>(index)?.map(Value::Integer),
        FieldType::Decimal => row.get::<_, Option<Decimal>>(index)?.map(Value::Decimal),
        FieldType::DateTime => row.get::<_, Option<NaiveDateTime>>(index)?.map(Value::DateTime),
        FieldType::Boolean => row.get::<_, Option<bool>>(index)?.map(Value::Boolean),
    })
}

fn read_record(row: &Row) -> rusqlite::Result<JobFiling> {
    let mut record = JobFiling::default();
    for (index, field) in schema::fields().iter().enumerate() {
        field.assign(&mut record, read_value(row, index, field)?);
    }
    Ok(record)
}

impl RecordStore for SqliteStore {
    fn count(&self, predicate: &Predicate) -> Result<usize> {
        let (condition, values) = predicate.to_sql();
        let sql = format!("select count(*) from {} where {}", TABLE, condition);
        let connection = self.connection()?;
        let count: i64 = connection.query_row(&sql, params_from_iter(values.iter()), |r| r.get(0))?;
        Ok(count as usize)
    }

    fn slice(&self, predicate: &Predicate, offset: usize, limit: usize) -> Result<Vec<JobFiling>> {
        let (condition, values) = predicate.to_sql();
        let sql = format!(
            "select {} from {} where {} order by \"{}\" limit ? offset ?",
            column_list(),
            TABLE,
            condition,
            PRIMARY_KEY_COLUMN
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let mut parameters: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        parameters.push(&limit);
        parameters.push(&offset);
        let connection = self.connection()?;
        let mut statement = connection.prepare_cached(&sql)?;
        let records = statement
            .query_map(params_from_iter(parameters), read_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn distinct(&self, field: &'static Field, limit: usize) -> Result<Vec<Value>> {
        let sql = format!(
            "select distinct \"{0}\" from {1} where \"{0}\" is not null order by \"{0}\" limit ?",
            field.column, TABLE
        );
        let connection = self.connection()?;
        let mut statement = connection.prepare_cached(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let values = statement
            .query_map(params![limit], |row| read_value(row, 0, field))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut values: Vec<Value> = values.into_iter().flatten().collect();
        // decimals are stored as text, so order them numerically here
        values.sort();
        Ok(values)
    }
}
