//! Turning user supplied `(field, operator, value)` conditions into a typed
//! [`Predicate`].
//!
//! Building never fails. A condition that names an unknown field, uses an
//! unknown operator, applies `contains` to a non-string field, or carries a
//! value that cannot be converted to the field's type becomes
//! [`Predicate::Never`] and a warning is logged. Because conditions are AND-ed,
//! one such condition makes the whole filter match nothing.
//!
//! The resulting predicate can be evaluated in memory ([`Predicate::matches`])
//! or rendered as a parameterised SQL `WHERE` clause ([`Predicate::to_sql`]).
//! User values only ever travel as bound parameters.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::datatype::{self, FieldType, Value};
use crate::schema::{self, Field, JobFiling};

/// SQL function a store must provide for decimal comparisons. It returns
/// -1, 0 or 1, or null when either side is null.
pub const DECIMAL_COMPARE: &str = "decimal_compare";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl Operator {
    /// Accepts the operator names and their symbolic aliases, ignoring case.
    pub fn parse(text: &str) -> Option<Operator> {
        match text.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" => Some(Operator::Eq),
            "gt" | ">" => Some(Operator::Gt),
            "ge" | ">=" => Some(Operator::Ge),
            "lt" | "<" => Some(Operator::Lt),
            "le" | "<=" => Some(Operator::Le),
            "contains" => Some(Operator::Contains),
            _ => None,
        }
    }
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Contains => "contains",
        }
    }
    pub fn is_ordering(&self) -> bool {
        matches!(self, Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le)
    }
    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Contains => false,
        }
    }
}
impl FromStr for Operator {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::parse(s).ok_or_else(|| format!("unknown operator '{}'", s))
    }
}
impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// One user supplied condition. The operator stays textual so that an
/// unknown operator degrades at build time instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    pub field_name: String,
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
}

impl FilterCondition {
    pub fn new(
        field_name: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            operator: operator.into(),
            value: value.into(),
            display_text: None,
        }
    }
    pub fn with_display_text(mut self, text: impl Into<String>) -> Self {
        self.display_text = Some(text.into());
        self
    }
}

/// A named, user owned list of conditions combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

impl FilterSet {
    pub fn predicate(&self) -> Predicate {
        build(&self.conditions)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Accepts every record.
    All,
    /// Accepts no record.
    Never,
    /// `field <operator> value`; a null field never matches.
    Compare {
        field: &'static Field,
        operator: Operator,
        value: Value,
    },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, record: &JobFiling) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Never => false,
            Predicate::Compare { field, operator, value } => match field.value(record) {
                None => false,
                Some(actual) => match (operator, &actual, value) {
                    (Operator::Contains, Value::String(haystack), Value::String(needle)) => {
                        haystack.contains(needle.as_str())
                    }
                    (Operator::Contains, _, _) => false,
                    (op, actual, value) => op.holds(actual.cmp(value)),
                },
            },
            Predicate::And(parts) => parts.iter().all(|p| p.matches(record)),
        }
    }

    /// Renders the predicate as a SQL boolean expression plus its bound
    /// parameters, in placeholder order. Column names come from the static
    /// schema, never from user input.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.write_sql(&mut params);
        (sql, params)
    }

    fn write_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Predicate::All => "1".to_string(),
            Predicate::Never => "0".to_string(),
            Predicate::Compare { field, operator, value } => {
                let column = format!("\"{}\"", field.column);
                params.push(value.clone());
                let comparison = match (operator, field.field_type) {
                    (Operator::Contains, _) => format!("instr({}, ?) > 0", column),
                    // decimals are stored as text and compared exactly by the store
                    (op, FieldType::Decimal) => {
                        format!("{}({}, ?) {} 0", DECIMAL_COMPARE, column, op.symbol())
                    }
                    (op, _) => format!("{} {} ?", column, op.symbol()),
                };
                if field.nullable {
                    format!("({} IS NOT NULL AND {})", column, comparison)
                } else {
                    comparison
                }
            }
            Predicate::And(parts) if parts.is_empty() => "1".to_string(),
            Predicate::And(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.write_sql(params)).collect();
                format!("({})", rendered.join(" AND "))
            }
        }
    }
}
impl Default for Predicate {
    fn default() -> Self {
        Predicate::All
    }
}
impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Predicate::All => write!(f, "true"),
            Predicate::Never => write!(f, "false"),
            Predicate::Compare { field, operator, value } => {
                write!(f, "{} {} {:?}", field.name, operator, value.to_string())
            }
            Predicate::And(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", rendered.join(" and "))
            }
        }
    }
}

/// Entry point for turning request conditions into a [`Predicate`]. Holds no
/// state, so one builder may be shared across sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterBuilder;

impl FilterBuilder {
    pub fn build(conditions: &[FilterCondition]) -> Predicate {
        build(conditions)
    }
}

/// Builds the predicate for a list of conditions. An empty list accepts every
/// record; otherwise every condition must hold.
pub fn build(conditions: &[FilterCondition]) -> Predicate {
    match conditions {
        [] => Predicate::All,
        [single] => build_condition(single),
        many => Predicate::And(many.iter().map(build_condition).collect()),
    }
}

/// Builds the predicate for one condition, degrading to [`Predicate::Never`]
/// when the condition cannot be applied.
pub fn build_condition(condition: &FilterCondition) -> Predicate {
    let Some(field) = schema::field(&condition.field_name) else {
        warn!(field = %condition.field_name, "unknown filter field");
        return Predicate::Never;
    };
    let Some(operator) = Operator::parse(&condition.operator) else {
        warn!(operator = %condition.operator, field = field.name, "unknown filter operator");
        return Predicate::Never;
    };
    if operator == Operator::Contains && field.field_type != FieldType::String {
        warn!(field = field.name, field_type = %field.field_type, "contains only applies to string fields");
        return Predicate::Never;
    }
    if operator.is_ordering() && !field.field_type.is_orderable() {
        warn!(field = field.name, field_type = %field.field_type, operator = %operator, "ordering comparison not allowed");
        return Predicate::Never;
    }
    match datatype::coerce(&condition.value, field.field_type) {
        Ok(value) => Predicate::Compare { field, operator, value },
        Err(datatype::CoercionError::Null) => {
            debug!(field = field.name, "null filter value matches nothing");
            Predicate::Never
        }
        Err(e) => {
            warn!(field = field.name, value = %condition.value, error = %e, "could not convert filter value");
            Predicate::Never
        }
    }
}
