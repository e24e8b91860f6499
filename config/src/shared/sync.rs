use serde::Deserialize;

use crate::Config;
use crate::shared::{
    BatchConfig, KiotVietConfig, MergeConfig, PgConnectionConfig, ValidationError,
    WarehouseConfig,
};

/// Complete configuration of a sync run.
///
/// This intentionally does not implement `Serialize` to avoid leaking secrets.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Postgres database the relational tables are copied from.
    pub source: PgConnectionConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub relational: RelationalSyncConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    /// Stock transfer sync. Skipped when absent.
    #[serde(default)]
    pub kiotviet: Option<KiotVietConfig>,
}

impl SyncConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.warehouse.validate()?;
        self.relational.validate()?;
        self.merge.validate()?;

        if let Some(kiotviet) = &self.kiotviet {
            kiotviet.validate()?;
        }

        Ok(())
    }
}

impl Config for SyncConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["relational.tables"];
}

/// Tables copied from the relational source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelationalSyncConfig {
    /// Source table names, synced in order.
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl RelationalSyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tables.iter().any(|table| table.trim().is_empty()) {
            return Err(ValidationError::invalid(
                "relational.tables",
                "must not contain empty table names",
            ));
        }

        self.batch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "source": {
                "host": "localhost",
                "port": 5432,
                "name": "giakho",
                "username": "postgres",
                "password": "postgres"
            },
            "warehouse": {
                "target_dataset": "websync",
                "staging_dataset": "presync",
                "backend": "memory"
            },
            "relational": {
                "tables": ["Products", "Orders"]
            }
        })
    }

    #[test]
    fn optional_sections_default() {
        let config: SyncConfig = serde_json::from_value(sample()).unwrap();

        assert_eq!(config.relational.tables, vec!["Products", "Orders"]);
        assert_eq!(config.relational.batch, BatchConfig::default());
        assert_eq!(config.merge, MergeConfig::default());
        assert!(config.kiotviet.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_table_name_is_rejected() {
        let mut value = sample();
        value["relational"]["tables"] = serde_json::json!(["Products", " "]);
        let config: SyncConfig = serde_json::from_value(value).unwrap();

        assert!(config.validate().is_err());
    }
}
