use chrono::NaiveDate;
use serde_json::{Value as Json, json};

use filingscope::datatype::{self, CoercionError, Decimal, FieldType, Value};
use filingscope::filter::{self, FilterBuilder, FilterCondition, Operator, Predicate};
use filingscope::schema::{self, JobFiling};

fn setup() -> Vec<JobFiling> {
    let mut a = JobFiling::new("A1");
    a.borough = Some("BROOKLYN".into());
    a.owner_name = Some("ACME Holdings".into());
    a.proposed_dwelling_units = Some(12);
    a.initial_cost = Decimal::from_str("1500.50");
    a.latest_action_date = NaiveDate::from_ymd_opt(2024, 3, 15).and_then(|d| d.and_hms_opt(0, 0, 0));

    let mut b = JobFiling::new("B2");
    b.borough = Some("QUEENS".into());
    b.owner_name = Some("acme partners".into());
    b.proposed_dwelling_units = Some(3);
    b.initial_cost = Decimal::from_str("99.99");
    b.latest_action_date = NaiveDate::from_ymd_opt(2023, 11, 2).and_then(|d| d.and_hms_opt(14, 30, 0));

    // every optional field left null
    let c = JobFiling::new("C3");

    vec![a, b, c]
}

fn matching(records: &[JobFiling], conditions: &[FilterCondition]) -> Vec<String> {
    let predicate = filter::build(conditions);
    records
        .iter()
        .filter(|r| predicate.matches(r))
        .map(|r| r.job_s1_no.clone())
        .collect()
}

#[test]
fn empty_filter_accepts_everything() {
    let records = setup();
    assert_eq!(filter::build(&[]), Predicate::All);
    assert_eq!(FilterBuilder::build(&[]), Predicate::All);
    assert_eq!(matching(&records, &[]).len(), 3, "no conditions means no restriction");
}

#[test]
fn single_equality() {
    let records = setup();
    let found = matching(&records, &[FilterCondition::new("Borough", "eq", "BROOKLYN")]);
    assert_eq!(found, vec!["A1"]);
}

#[test]
fn field_names_resolve_by_property_column_and_key() {
    let records = setup();
    for name in ["Borough", "BOROUGH", "borough", " bOrOuGh "] {
        let found = matching(&records, &[FilterCondition::new(name, "eq", "QUEENS")]);
        assert_eq!(found, vec!["B2"], "field name {:?}", name);
    }
    assert!(schema::field("LATEST_ACTION_DATE").is_some());
    assert!(schema::field("latest_action_date").is_some());
    assert!(schema::field("NoSuchField").is_none());
}

#[test]
fn malformed_condition_makes_the_whole_filter_match_nothing() {
    let records = setup();
    let valid = FilterCondition::new("Borough", "eq", "BROOKLYN");
    let malformed = [
        FilterCondition::new("NoSuchField", "eq", "x"),
        FilterCondition::new("Borough", "between", "x"),
        FilterCondition::new("ProposedDwellingUnits", "gt", "many"),
        FilterCondition::new("ProposedDwellingUnits", "contains", "1"),
        FilterCondition::new("ProposedDwellingUnits", "eq", json!(2.5)),
        FilterCondition::new("ProposedDwellingUnits", "eq", "2.5"),
        FilterCondition::new("LatestActionDate", "gt", "not a date"),
        FilterCondition::new("Borough", "eq", json!(["BROOKLYN"])),
    ];
    for bad in malformed {
        assert_eq!(filter::build_condition(&bad), Predicate::Never, "{:?}", bad);
        let found = matching(&records, &[valid.clone(), bad.clone()]);
        assert!(found.is_empty(), "{:?} AND-ed with a valid condition should match nothing", bad);
    }
}

#[test]
fn nulls_never_match() {
    let records = setup();
    for op in ["eq", "gt", "ge", "lt", "le", "contains"] {
        let found = matching(&records, &[FilterCondition::new("OwnerName", op, "A")]);
        assert!(!found.contains(&"C3".to_string()), "null owner matched {}", op);
    }
    for op in ["eq", "gt", "ge", "lt", "le"] {
        let found = matching(&records, &[FilterCondition::new("ProposedDwellingUnits", op, 0)]);
        assert!(!found.contains(&"C3".to_string()), "null units matched {}", op);
    }
    let found = matching(&records, &[FilterCondition::new("Borough", "eq", Json::Null)]);
    assert!(found.is_empty(), "a null comparison value matches nothing");
}

#[test]
fn operator_aliases_and_case() {
    let records = setup();
    let pairs = [("gt", ">"), ("ge", ">="), ("lt", "<"), ("le", "<="), ("eq", "=="), ("eq", "=")];
    for (name, alias) in pairs {
        let by_name = matching(&records, &[FilterCondition::new("ProposedDwellingUnits", name, 3)]);
        let by_alias = matching(&records, &[FilterCondition::new("ProposedDwellingUnits", alias, 3)]);
        assert_eq!(by_name, by_alias, "{} vs {}", name, alias);
    }
    assert_eq!(Operator::parse("CONTAINS"), Some(Operator::Contains));
    assert_eq!(Operator::parse("Ge"), Some(Operator::Ge));
    assert_eq!(Operator::parse("~"), None);
}

#[test]
fn integer_comparisons() {
    let records = setup();
    assert_eq!(matching(&records, &[FilterCondition::new("ProposedDwellingUnits", "gt", 3)]), vec!["A1"]);
    assert_eq!(matching(&records, &[FilterCondition::new("ProposedDwellingUnits", "ge", "3")]), vec!["A1", "B2"]);
    // integral decimals are accepted for integer fields
    assert_eq!(matching(&records, &[FilterCondition::new("ProposedDwellingUnits", "eq", "12.0")]), vec!["A1"]);
}

#[test]
fn contains_is_case_sensitive() {
    let records = setup();
    assert_eq!(matching(&records, &[FilterCondition::new("OwnerName", "contains", "ACME")]), vec!["A1"]);
    assert_eq!(matching(&records, &[FilterCondition::new("OwnerName", "contains", "acme")]), vec!["B2"]);
}

#[test]
fn date_comparisons() {
    let records = setup();
    let after = matching(&records, &[FilterCondition::new("LatestActionDate", "gt", "2024-03-01")]);
    assert_eq!(after, vec!["A1"]);
    let before = matching(&records, &[FilterCondition::new("LatestActionDate", "lt", "03/01/2024")]);
    assert_eq!(before, vec!["B2"]);
    let exact = matching(&records, &[FilterCondition::new("LatestActionDate", "eq", "2023-11-02T14:30:00")]);
    assert_eq!(exact, vec!["B2"]);
    let offset = matching(&records, &[FilterCondition::new("LatestActionDate", "eq", "2023-11-02T16:30:00+02:00")]);
    assert_eq!(offset, vec!["B2"], "offsets are normalised to UTC");
}

#[test]
fn decimal_comparisons() {
    let records = setup();
    assert_eq!(matching(&records, &[FilterCondition::new("InitialCost", "ge", json!(1500.5))]), vec!["A1"]);
    assert_eq!(matching(&records, &[FilterCondition::new("InitialCost", "lt", "100")]), vec!["B2"]);
    assert_eq!(matching(&records, &[FilterCondition::new("InitialCost", "eq", "1500.50")]), vec!["A1"]);
}

#[test]
fn sql_rendering_binds_user_values() {
    let hostile = "'; DROP TABLE JobFilings; --";
    let predicate = filter::build(&[
        FilterCondition::new("OwnerName", "eq", hostile),
        FilterCondition::new("InitialCost", "gt", "10"),
    ]);
    let (sql, params) = predicate.to_sql();
    assert!(!sql.contains("DROP"), "user text must not reach the SQL: {}", sql);
    assert_eq!(params.len(), 2);
    assert_eq!(params[0], Value::String(hostile.to_string()));
    assert!(sql.contains("\"OWNER_NAME\" IS NOT NULL"));
    assert!(sql.contains("decimal_compare(\"INITIAL_COST\", ?) > 0"), "{}", sql);
    assert_eq!(Predicate::All.to_sql().0, "1");
    assert_eq!(Predicate::Never.to_sql().0, "0");
}

#[test]
fn coercion_rules() {
    assert_eq!(datatype::coerce(&json!("yes"), FieldType::Boolean), Ok(Value::Boolean(true)));
    assert_eq!(datatype::coerce(&json!(0), FieldType::Boolean), Ok(Value::Boolean(false)));
    assert!(datatype::coerce(&json!(2), FieldType::Boolean).is_err());
    assert_eq!(datatype::coerce(&Json::Null, FieldType::String), Err(CoercionError::Null));
    assert_eq!(datatype::coerce(&json!(42), FieldType::String), Ok(Value::String("42".into())));
    assert_eq!(datatype::coerce(&json!("1.2e1"), FieldType::Integer), Ok(Value::Integer(12)));
    assert!(datatype::coerce(&json!({"a": 1}), FieldType::Decimal).is_err());
    assert_eq!(datatype::parse_cell("  ", FieldType::Integer), None);
    assert_eq!(datatype::parse_cell("n/a", FieldType::DateTime), None);
}

#[test]
fn filter_sets_build_their_predicate() {
    let records = setup();
    let set: filter::FilterSet = serde_json::from_value(json!({
        "name": "big brooklyn jobs",
        "userId": "alice",
        "conditions": [
            {"fieldName": "Borough", "operator": "eq", "value": "BROOKLYN", "displayText": "Borough = BROOKLYN"},
            {"fieldName": "ProposedDwellingUnits", "operator": ">", "value": 10}
        ]
    }))
    .expect("filter set deserializes");
    let predicate = set.predicate();
    let found: Vec<&str> = records.iter().filter(|r| predicate.matches(r)).map(|r| r.job_s1_no.as_str()).collect();
    assert_eq!(found, vec!["A1"]);
}
