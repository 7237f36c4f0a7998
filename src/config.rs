//! Settings, read from defaults, then an optional `filingscope` config file
//! (or an explicitly given one), then `FILINGSCOPE_` environment variables,
//! e.g. `FILINGSCOPE_SERVER__BIND=0.0.0.0:8080`.

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::loading::LoadOptions;
use crate::persist::PersistenceMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub loading: LoadingSettings,
    pub filters: FilterSettings,
    pub columns: ColumnSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; absent, empty or `:memory:` keeps the data in memory.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadingSettings {
    pub channel_capacity: usize,
    pub initial_batch_size: usize,
    pub subsequent_batch_size: usize,
    pub sweep_interval_secs: u64,
    pub max_session_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterSettings {
    pub saved_filters_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSettings {
    pub metadata_file: String,
    pub preferences_dir: String,
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Settings> {
        let defaults = LoadOptions::default();
        let mut builder = Config::builder()
            .set_default("server.bind", "127.0.0.1:3000")?
            .set_default("loading.channel_capacity", 10_i64)?
            .set_default("loading.initial_batch_size", defaults.initial_batch_size as i64)?
            .set_default("loading.subsequent_batch_size", defaults.subsequent_batch_size as i64)?
            .set_default("loading.sweep_interval_secs", 60_i64)?
            .set_default("loading.max_session_age_secs", 300_i64)?
            .set_default("filters.saved_filters_dir", "data/filters")?
            .set_default("columns.metadata_file", "data/column-metadata.json")?
            .set_default("columns.preferences_dir", "data/preferences")?;
        builder = match file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("filingscope").required(false)),
        };
        let settings = builder
            .add_source(
                Environment::with_prefix("FILINGSCOPE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        PersistenceMode::from_path(self.database.path.as_deref())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            initial_batch_size: self.loading.initial_batch_size,
            subsequent_batch_size: self.loading.subsequent_batch_size,
        }
    }
}
