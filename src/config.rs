use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Column, DbError, Result, parse_timestamp};
use crate::model::RecordTypeBuilder;
use crate::expiration::Expires;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// chrono format string used to serialize fresh timestamps and to parse
    /// text written into TIMESTAMP columns
    pub date_format: String,

    /// Emit the rendered WHERE clause of every executed query at debug level
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            log_queries: false,
        }
    }
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timestamp format
    pub fn date_format(mut self, format: &str) -> Self {
        self.date_format = format.to_string();
        self
    }

    /// Enable or disable query logging
    pub fn log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check that `date_format` renders a timestamp that reads back as one.
    /// Date-only formats and unknown specifiers are rejected.
    pub fn validate(&self) -> Result<()> {
        let mut rendered = String::new();
        write!(rendered, "{}", DateTime::<Utc>::UNIX_EPOCH.format(&self.date_format)).map_err(|_| {
            DbError::ParseError(format!("Invalid date_format '{}'", self.date_format))
        })?;

        parse_timestamp(&rendered, &self.date_format).map_err(|_| {
            DbError::ParseError(format!(
                "date_format '{}' does not round-trip: '{}' cannot be read back as a timestamp",
                self.date_format, rendered
            ))
        })?;
        Ok(())
    }
}

/// Declarative description of a record type.
///
/// ```
/// use expirable::config::RecordTypeConfig;
///
/// let config = RecordTypeConfig::from_json(r#"{
///     "name": "Post",
///     "table": "posts",
///     "columns": [
///         { "name": "id", "data_type": "integer", "primary_key": true },
///         { "name": "title", "data_type": "text" },
///         { "name": "ends_at", "data_type": "timestamp" }
///     ],
///     "constants": { "EXPIRED_AT": "ends_at" },
///     "expires": true
/// }"#).unwrap();
///
/// let posts = config.into_builder().unwrap().build().unwrap();
/// assert_eq!(posts.table(), "posts");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTypeConfig {
    pub name: String,
    pub table: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub constants: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub expires: bool,
}

impl RecordTypeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn into_builder(self) -> Result<RecordTypeBuilder> {
        if self.columns.is_empty() {
            return Err(DbError::ParseError(format!(
                "Record type '{}' declares no columns",
                self.name
            )));
        }

        let mut builder = RecordTypeBuilder::new(self.name, self.table)
            .columns(self.columns)
            .timestamps(self.timestamps);
        for (name, value) in self.constants {
            builder = builder.constant(name, value);
        }
        if self.expires {
            builder = builder.behavior(Expires);
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::new();
        assert_eq!(config.date_format, DEFAULT_DATE_FORMAT);
        assert!(!config.log_queries);
    }

    #[test]
    fn test_database_config_from_partial_json() {
        let config = DatabaseConfig::from_json(r#"{ "log_queries": true }"#).unwrap();
        assert!(config.log_queries);
        assert_eq!(config.date_format, DEFAULT_DATE_FORMAT);
    }

    #[test]
    fn test_date_format_must_round_trip() {
        assert!(DatabaseConfig::new().validate().is_ok());
        assert!(DatabaseConfig::new().date_format("%d/%m/%Y %H:%M").validate().is_ok());
        assert!(matches!(
            DatabaseConfig::new().date_format("%Y-%m-%d").validate(),
            Err(DbError::ParseError(_))
        ));
        assert!(matches!(
            DatabaseConfig::new().date_format("%Q %Y").validate(),
            Err(DbError::ParseError(_))
        ));
    }

    #[test]
    fn test_record_type_config_requires_columns() {
        let config = RecordTypeConfig::from_json(
            r#"{ "name": "Post", "table": "posts", "columns": [] }"#,
        )
        .unwrap();
        assert!(config.into_builder().is_err());
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        assert!(matches!(
            RecordTypeConfig::from_json("{"),
            Err(DbError::ParseError(_))
        ));
    }
}
