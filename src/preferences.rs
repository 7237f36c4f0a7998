//! Per-user state kept as JSON files: saved filter sets, and column display
//! metadata with per-user overrides.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FilingsError, Result};
use crate::filter::FilterSet;

/// User ids and filter set ids become path components.
fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(FilingsError::InvalidArgument(format!("invalid {} '{}'", kind, name)))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

// ------------- Filter sets --------------

/// Saved filter sets, one file per set under a directory per user.
#[derive(Debug, Clone)]
pub struct FilterSetRepository {
    dir: PathBuf,
}

impl FilterSetRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        validate_name("user id", user_id)?;
        Ok(self.dir.join(user_id))
    }

    fn path(&self, user_id: &str, id: &str) -> Result<PathBuf> {
        validate_name("filter set id", id)?;
        Ok(self.user_dir(user_id)?.join(format!("{}.json", id)))
    }

    /// Stores the set for the user, assigning a fresh id when it has none,
    /// and returns what was stored.
    pub fn save(&self, user_id: &str, mut set: FilterSet) -> Result<FilterSet> {
        if set.name.trim().is_empty() {
            return Err(FilingsError::InvalidArgument("filter set name is required".into()));
        }
        let id = set.id.take().unwrap_or_else(|| Uuid::new_v4().to_string());
        let path = self.path(user_id, &id)?;
        set.id = Some(id);
        set.user_id = user_id.to_string();
        write_json(&path, &set)?;
        info!(user = user_id, id = set.id.as_deref().unwrap_or_default(), name = %set.name, "filter set saved");
        Ok(set)
    }

    /// All sets of a user ordered by name. Files that cannot be read are skipped.
    pub fn list(&self, user_id: &str) -> Result<Vec<FilterSet>> {
        let dir = self.user_dir(user_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut sets = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<FilterSet>(&path) {
                Ok(Some(set)) => sets.push(set),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable filter set"),
            }
        }
        sets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sets)
    }

    pub fn get(&self, user_id: &str, id: &str) -> Result<Option<FilterSet>> {
        read_json(&self.path(user_id, id)?)
    }

    /// Removes a set. Returns false when there was nothing to remove.
    pub fn delete(&self, user_id: &str, id: &str) -> Result<bool> {
        match fs::remove_file(self.path(user_id, id)?) {
            Ok(()) => {
                info!(user = user_id, id, "filter set deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ------------- Columns --------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub field_name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub is_filterable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
}

fn default_true() -> bool {
    true
}
fn default_data_type() -> String {
    "string".to_string()
}
fn default_width() -> u32 {
    150
}

impl ColumnMetadata {
    fn new(field_name: &str, display_name: &str, description: &str, display_order: i32) -> Self {
        Self {
            field_name: field_name.to_string(),
            display_name: display_name.to_string(),
            description: Some(description.to_string()),
            visible: true,
            display_order,
            pinned: false,
            data_type: default_data_type(),
            is_filterable: false,
            format: None,
            width: default_width(),
        }
    }
    fn filterable(mut self) -> Self {
        self.is_filterable = true;
        self
    }
    fn typed(mut self, data_type: &str, format: Option<&str>) -> Self {
        self.data_type = data_type.to_string();
        self.format = format.map(str::to_string);
        self
    }
}

/// One user's override of a column's display attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserColumnPreference {
    #[serde(default)]
    pub user_id: String,
    pub field_name: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default = "default_width")]
    pub width: u32,
}

/// The columns shown when no metadata file exists yet.
pub fn default_columns() -> Vec<ColumnMetadata> {
    let mut job = ColumnMetadata::new("JobS1No", "Job S1 No", "Job S1 Number (Primary Key)", 0).filterable();
    job.pinned = true;
    vec![
        job,
        ColumnMetadata::new("Borough", "Borough", "Borough where the job is located", 1).filterable(),
        ColumnMetadata::new("HouseNo", "House No", "House number", 2),
        ColumnMetadata::new("StreetName", "Street Name", "Street name", 3),
        ColumnMetadata::new("Block", "Block", "Block number", 4),
        ColumnMetadata::new("Lot", "Lot", "Lot number", 5),
        ColumnMetadata::new("JobType", "Job Type", "Type of job filing", 6).filterable(),
        ColumnMetadata::new("JobStatus", "Job Status", "Current status of the job", 7).filterable(),
        ColumnMetadata::new("LatestActionDate", "Latest Action Date", "Date of the latest action", 8)
            .typed("datetime", Some("MM/dd/yyyy"))
            .filterable(),
        ColumnMetadata::new("FilingDate", "Filing Date", "Original filing date", 9).typed("datetime", Some("MM/dd/yyyy")),
        ColumnMetadata::new("InitialCost", "Initial Cost", "Initial cost of the project", 10)
            .typed("decimal", Some("C2"))
            .filterable(),
        ColumnMetadata::new("ProposedDwellingUnits", "Proposed Dwelling Units", "Number of proposed dwelling units", 11)
            .typed("int", None)
            .filterable(),
    ]
}

/// Base column metadata from a JSON file plus per-user overrides.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    metadata_path: PathBuf,
    preferences_dir: PathBuf,
}

impl ColumnCatalog {
    pub fn new(metadata_path: impl Into<PathBuf>, preferences_dir: impl Into<PathBuf>) -> Self {
        Self { metadata_path: metadata_path.into(), preferences_dir: preferences_dir.into() }
    }

    fn preferences_path(&self, user_id: &str) -> Result<PathBuf> {
        validate_name("user id", user_id)?;
        Ok(self.preferences_dir.join(format!("{}.json", user_id)))
    }

    fn base_metadata(&self) -> Result<Vec<ColumnMetadata>> {
        match read_json::<Vec<ColumnMetadata>>(&self.metadata_path) {
            Ok(Some(columns)) => Ok(columns),
            Ok(None) => {
                let columns = default_columns();
                write_json(&self.metadata_path, &columns)?;
                debug!(path = %self.metadata_path.display(), "default column metadata written");
                Ok(columns)
            }
            Err(e) => {
                warn!(path = %self.metadata_path.display(), error = %e, "column metadata unreadable, using defaults");
                Ok(default_columns())
            }
        }
    }

    /// Column metadata, with the user's preferences applied when given,
    /// sorted by display order.
    pub fn columns(&self, user_id: Option<&str>) -> Result<Vec<ColumnMetadata>> {
        let mut columns = self.base_metadata()?;
        if let Some(user_id) = user_id {
            let preferences = self.preferences(user_id)?;
            for preference in &preferences {
                if let Some(column) = columns.iter_mut().find(|c| c.field_name == preference.field_name) {
                    column.visible = preference.visible;
                    column.display_order = preference.display_order;
                    column.pinned = preference.pinned;
                    column.width = preference.width;
                }
            }
        }
        columns.sort_by_key(|c| c.display_order);
        Ok(columns)
    }

    pub fn preferences(&self, user_id: &str) -> Result<Vec<UserColumnPreference>> {
        let path = self.preferences_path(user_id)?;
        match read_json(&path) {
            Ok(preferences) => Ok(preferences.unwrap_or_default()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "column preferences unreadable, ignoring");
                Ok(Vec::new())
            }
        }
    }

    pub fn save_preferences(&self, user_id: &str, preferences: &[UserColumnPreference]) -> Result<()> {
        let path = self.preferences_path(user_id)?;
        let preferences: Vec<UserColumnPreference> = preferences
            .iter()
            .cloned()
            .map(|mut p| {
                p.user_id = user_id.to_string();
                p
            })
            .collect();
        write_json(&path, &preferences)?;
        info!(user = user_id, columns = preferences.len(), "column preferences saved");
        Ok(())
    }

    /// Names of the columns the user sees, in display order.
    pub fn visible_fields(&self, user_id: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .columns(user_id)?
            .into_iter()
            .filter(|c| c.visible)
            .map(|c| c.field_name)
            .collect())
    }
}
