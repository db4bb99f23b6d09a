use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::DatabaseConfig;
use crate::core::{Result, Row, Value};
use crate::model::{Record, RecordType};
use crate::query::Query;
use crate::storage::InMemoryStorage;

/// Entry point: owns the tables, the clock and the configuration.
///
/// There is no process-wide instance. Create one at startup and pass it to
/// every query and save.
///
/// # Examples
///
/// ```
/// use expirable::prelude::*;
///
/// # fn main() -> expirable::Result<()> {
/// let posts = RecordTypeBuilder::new("Post", "posts")
///     .column(Column::new("id", DataType::Integer))
///     .column(Column::new("title", DataType::Text))
///     .column(Column::new("expired_at", DataType::Timestamp))
///     .behavior(Expires)
///     .build()?;
///
/// let db = Database::new();
/// db.create_table(&posts)?;
///
/// let mut post = db.create(&posts, [("title", Value::from("hello"))])?;
/// post.expire(&db)?;
///
/// assert_eq!(db.query(&posts).count()?, 0);
/// assert_eq!(db.query(&posts).with_expired()?.count()?, 1);
/// # Ok(())
/// # }
/// ```
pub struct Database {
    storage: RwLock<InMemoryStorage>,
    clock: Arc<dyn Clock>,
    config: DatabaseConfig,
}

impl Database {
    pub fn new() -> Self {
        Self::assemble(DatabaseConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self::assemble(DatabaseConfig::default(), Arc::new(clock))
    }

    /// Fails when `config.date_format` cannot be read back as a timestamp.
    pub fn with_config(config: DatabaseConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, clock))
    }

    fn assemble(config: DatabaseConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: RwLock::new(InMemoryStorage::new()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn fresh_timestamp(&self) -> DateTime<Utc> {
        self.now()
    }

    /// Current time in the configured `date_format`.
    pub fn fresh_timestamp_string(&self) -> String {
        self.now().format(&self.config.date_format).to_string()
    }

    pub fn create_table(&self, record_type: &RecordType) -> Result<()> {
        self.write_storage()?.create_table(record_type.schema().clone())?;
        debug!(table = record_type.table(), "table created");
        Ok(())
    }

    pub fn drop_table(&self, record_type: &RecordType) -> Result<()> {
        self.write_storage()?.drop_table(record_type.table())
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.read_storage()?.list_tables())
    }

    /// A query with every global scope of the type in effect.
    pub fn query<'db>(&'db self, record_type: &Arc<RecordType>) -> Query<'db> {
        Query::new(self, record_type.clone())
    }

    /// A query with no global scopes and no scope extensions.
    pub fn query_without_scopes<'db>(&'db self, record_type: &Arc<RecordType>) -> Query<'db> {
        Query::bare(self, record_type.clone())
    }

    /// Build a record from attributes and save it.
    pub fn create<'a>(
        &self,
        record_type: &Arc<RecordType>,
        attributes: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Record> {
        let mut record = record_type.make();
        record.fill(attributes)?;
        record.save(self)?;
        Ok(record)
    }

    /// Look a record up by key through the default (scoped) query path.
    pub fn find(&self, record_type: &Arc<RecordType>, key: impl Into<Value>) -> Result<Option<Record>> {
        self.query(record_type)
            .where_eq(record_type.key_name(), key)
            .first()
    }

    pub(crate) fn insert_row(&self, table: &str, row: Row) -> Result<Row> {
        let mut storage = self.write_storage()?;
        let table = storage.get_table_mut(table)?;
        let row = table.schema().cast_row(&row, &self.config.date_format)?;
        let (_, stored) = table.insert(row)?;
        Ok(stored)
    }

    /// Replace the row holding `key`. `None` when no row has that key.
    pub(crate) fn update_row(&self, table: &str, key: &Value, row: Row) -> Result<Option<Row>> {
        let mut storage = self.write_storage()?;
        let table = storage.get_table_mut(table)?;
        let row = table.schema().cast_row(&row, &self.config.date_format)?;

        let Some((id, _)) = table.find_by_key(key) else {
            return Ok(None);
        };
        if table.update(id, row.clone())? {
            Ok(Some(row))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn fetch_row(&self, table: &str, key: &Value) -> Result<Option<Row>> {
        let storage = self.read_storage()?;
        Ok(storage.get_table(table)?.find_by_key(key).map(|(_, row)| row))
    }

    pub(crate) fn read_storage(&self) -> Result<RwLockReadGuard<'_, InMemoryStorage>> {
        Ok(self.storage.read()?)
    }

    pub(crate) fn write_storage(&self) -> Result<RwLockWriteGuard<'_, InMemoryStorage>> {
        Ok(self.storage.write()?)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
