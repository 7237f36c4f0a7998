//! The job filing record and the static description of its fields.
//!
//! Field resolution never reflects over the struct at run time: every field is
//! listed once in [`FIELDS`] together with its column name, type, nullability
//! and a pair of plain function pointers that read and write the value. The
//! filter builder, the SQLite store and the CSV importer all go through this
//! table.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::datatype::{Decimal, FieldType, Value};

/// A DOB job application filing from NYC Open Data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFiling {
    /// Primary key.
    pub job_s1_no: String,
    pub borough: Option<String>,
    pub house_no: Option<String>,
    pub street_name: Option<String>,
    pub block: Option<String>,
    pub lot: Option<String>,
    pub zip_code: Option<String>,
    pub building_type: Option<String>,
    pub job_type: Option<String>,
    pub job_status: Option<String>,
    pub job_status_description: Option<String>,
    pub latest_action_date: Option<NaiveDateTime>,
    pub filing_date: Option<NaiveDateTime>,
    pub approved_date: Option<NaiveDateTime>,
    pub fully_paid: Option<String>,
    pub initial_cost: Option<Decimal>,
    pub total_estimated_fee: Option<Decimal>,
    pub fee_status: Option<String>,
    pub existing_dwelling_units: Option<i64>,
    pub proposed_dwelling_units: Option<i64>,
    pub existing_occupancy: Option<String>,
    pub proposed_occupancy: Option<String>,
    pub existing_stories: Option<i64>,
    pub proposed_stories: Option<i64>,
    pub existing_zoning_square_feet: Option<Decimal>,
    pub proposed_zoning_square_feet: Option<Decimal>,
    pub horizontal_enlargement: Option<Decimal>,
    pub vertical_enlargement: Option<Decimal>,
    pub enlargement_square_feet: Option<Decimal>,
    pub owner_type: Option<String>,
    pub owner_name: Option<String>,
    pub owner_business: Option<String>,
    pub owner_house_street: Option<String>,
    pub city_state_zip: Option<String>,
}

impl JobFiling {
    pub fn new(job_s1_no: impl Into<String>) -> Self {
        Self { job_s1_no: job_s1_no.into(), ..Default::default() }
    }
}

type Getter = fn(&JobFiling) -> Option<Value>;
type Setter = fn(&mut JobFiling, Option<Value>);

/// Static description of one record field.
pub struct Field {
    /// Property name, e.g. `LatestActionDate`.
    pub name: &'static str,
    /// Column name in the dataset and the SQLite table, e.g. `LATEST_ACTION_DATE`.
    pub column: &'static str,
    /// Key used in JSON, e.g. `latest_action_date`.
    pub key: &'static str,
    pub field_type: FieldType,
    pub nullable: bool,
    getter: Getter,
    setter: Setter,
}

impl Field {
    /// The field's value on a record, `None` when null.
    pub fn value(&self, record: &JobFiling) -> Option<Value> {
        (self.getter)(record)
    }
    /// Stores a value; a value of the wrong type is stored as null.
    pub fn assign(&self, record: &mut JobFiling, value: Option<Value>) {
        (self.setter)(record, value)
    }
    pub fn is_primary_key(&self) -> bool {
        self.column == PRIMARY_KEY_COLUMN
    }
}
impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("field_type", &self.field_type)
            .field("nullable", &self.nullable)
            .finish()
    }
}
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.column == other.column
    }
}
impl Eq for Field {}

pub const PRIMARY_KEY_COLUMN: &str = "JOB_S1_NO";
pub const TABLE: &str = "JobFilings";

macro_rules! fields {
    (@type Text) => { FieldType::String };
    (@type Int) => { FieldType::Integer };
    (@type Dec) => { FieldType::Decimal };
    (@type Date) => { FieldType::DateTime };
    (@get Text, $e:expr) => { $e.clone().map(Value::String) };
    (@get Int, $e:expr) => { $e.map(Value::Integer) };
    (@get Dec, $e:expr) => { $e.clone().map(Value::Decimal) };
    (@get Date, $e:expr) => { $e.map(Value::DateTime) };
    (@set Text, $v:expr) => { $v.and_then(Value::into_string) };
    (@set Int, $v:expr) => { $v.and_then(Value::into_integer) };
    (@set Dec, $v:expr) => { $v.and_then(Value::into_decimal) };
    (@set Date, $v:expr) => { $v.and_then(Value::into_datetime) };
    ( $( $name:literal, $column:literal, $key:ident : $kind:ident; )* ) => {
        [
            Field {
                name: "JobS1No",
                column: PRIMARY_KEY_COLUMN,
                key: "job_s1_no",
                field_type: FieldType::String,
                nullable: false,
                getter: |r| Some(Value::String(r.job_s1_no.clone())),
                setter: |r, v| r.job_s1_no = v.and_then(Value::into_string).unwrap_or_default(),
            },
            $(
                Field {
                    name: $name,
                    column: $column,
                    key: stringify!($key),
                    field_type: fields!(@type $kind),
                    nullable: true,
                    getter: |r| fields!(@get $kind, r.$key),
                    setter: |r, v| r.$key = fields!(@set $kind, v),
                },
            )*
        ]
    };
}

/// Every field of [`JobFiling`], primary key first, in column order.
pub static FIELDS: [Field; 34] = fields! {
    "Borough", "BOROUGH", borough: Text;
    "HouseNo", "HOUSE_NO", house_no: Text;
    "StreetName", "STREET_NAME", street_name: Text;
    "Block", "BLOCK", block: Text;
    "Lot", "LOT", lot: Text;
    "ZipCode", "ZIP_CODE", zip_code: Text;
    "BuildingType", "BLDG_TYPE", building_type: Text;
    "JobType", "JOB_TYPE", job_type: Text;
    "JobStatus", "JOB_STATUS", job_status: Text;
    "JobStatusDescription", "JOB_STATUS_DESCRP", job_status_description: Text;
    "LatestActionDate", "LATEST_ACTION_DATE", latest_action_date: Date;
    "FilingDate", "FILING_DATE", filing_date: Date;
    "ApprovedDate", "APPROVED_DATE", approved_date: Date;
    "FullyPaid", "FULLY_PAID", fully_paid: Text;
    "InitialCost", "INITIAL_COST", initial_cost: Dec;
    "TotalEstimatedFee", "TOTAL_EST_FEE", total_estimated_fee: Dec;
    "FeeStatus", "FEE_STATUS", fee_status: Text;
    "ExistingDwellingUnits", "EXISTING_DWELLING_UNITS", existing_dwelling_units: Int;
    "ProposedDwellingUnits", "PROPOSED_DWELLING_UNITS", proposed_dwelling_units: Int;
    "ExistingOccupancy", "EXISTING_OCCUPANCY", existing_occupancy: Text;
    "ProposedOccupancy", "PROPOSED_OCCUPANCY", proposed_occupancy: Text;
    "ExistingStories", "EXISTING_STORIES", existing_stories: Int;
    "ProposedStories", "PROPOSED_STORIES", proposed_stories: Int;
    "ExistingZoningSquareFeet", "EXISTING_ZONING_SQFT", existing_zoning_square_feet: Dec;
    "ProposedZoningSquareFeet", "PROPOSED_ZONING_SQFT", proposed_zoning_square_feet: Dec;
    "HorizontalEnlargement", "HORIZONTAL_ENLRGMT", horizontal_enlargement: Dec;
    "VerticalEnlargement", "VERTICAL_ENLRGMT", vertical_enlargement: Dec;
    "EnlargementSquareFeet", "ENLARGEMENT_SQFT", enlargement_square_feet: Dec;
    "OwnerType", "OWNER_TYPE", owner_type: Text;
    "OwnerName", "OWNER_NAME", owner_name: Text;
    "OwnerBusiness", "OWNER_BUSINESS", owner_business: Text;
    "OwnerHouseStreet", "OWNER_HOUSE_STREET", owner_house_street: Text;
    "CityStateZip", "CITY_STATE_ZIP", city_state_zip: Text;
};

lazy_static! {
    // property name, column name and JSON key all resolve, case-insensitively
    static ref BY_NAME: HashMap<String, &'static Field> = {
        let mut lookup = HashMap::new();
        for field in FIELDS.iter() {
            lookup.insert(field.name.to_ascii_lowercase(), field);
            lookup.insert(field.column.to_ascii_lowercase(), field);
            lookup.insert(field.key.to_ascii_lowercase(), field);
        }
        lookup
    };
}

pub fn fields() -> &'static [Field] {
    &FIELDS
}

/// Resolves a user supplied field name.
pub fn field(name: &str) -> Option<&'static Field> {
    BY_NAME.get(&name.trim().to_ascii_lowercase()).copied()
}

pub fn primary_key() -> &'static Field {
    &FIELDS[0]
}
