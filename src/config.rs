use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::default_required_columns;
use crate::error::{Result, SyncError};
use crate::pipeline::processing::materialize::layout::LayoutProfile;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub layout: LayoutProfile,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_required_columns")]
    pub required_columns: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            required_columns: default_required_columns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("warehouse.db")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

impl AppConfig {
    /// Loads configuration, then applies `EXCEL_SYNC_*` environment overrides.
    ///
    /// An explicitly given path must exist. Without one, `config.toml` in the
    /// working directory is used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.layout.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(db) = env_var("EXCEL_SYNC_DB_PATH")? {
            self.warehouse.database_path = PathBuf::from(db);
        }
        if let Some(dir) = env_var("EXCEL_SYNC_LOG_DIR")? {
            self.logging.directory = PathBuf::from(dir);
        }
        if let Some(row) = env_var("EXCEL_SYNC_HEADER_ROW")? {
            self.layout.header_row = row.trim().parse().map_err(|_| {
                SyncError::Config(format!("EXCEL_SYNC_HEADER_ROW must be a row index, got '{}'", row))
            })?;
        }
        if let Some(cell) = env_var("EXCEL_SYNC_SUPPLIER_CELL")? {
            self.layout.supplier_id_cell = cell.trim().to_string();
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.warehouse.database_path, PathBuf::from("warehouse.db"));
        assert_eq!(config.layout, LayoutProfile::default());
        assert_eq!(config.quality.required_columns, default_required_columns());
        assert_eq!(config.logging.directory, PathBuf::from("logs"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [warehouse]
            database_path = "/var/lib/excel_sync/wh.db"

            [layout]
            sheet = "Orders"
            header_row = 4
            supplier_id_cell = "C2"

            [quality]
            required_columns = ["SKU", "supplier_id"]
            "#,
        )
        .unwrap();
        assert_eq!(config.layout.sheet.as_deref(), Some("Orders"));
        assert_eq!(config.layout.header_row, 4);
        assert_eq!(config.layout.supplier_id_cell, "C2");
        assert_eq!(config.quality.required_columns, vec!["SKU", "supplier_id"]);
        assert_eq!(config.logging.directory, PathBuf::from("logs"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&tmp.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(matches!(
            AppConfig::from_toml("[layout]\nheader_row = \"two\""),
            Err(SyncError::Toml(_))
        ));
    }
}
