use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::events::ModelEvent;
use super::record_type::{CREATED_AT, RecordType, UPDATED_AT};
use crate::core::{DbError, Result, Row, Value};
use crate::facade::Database;

/// One row of a record type, loaded or not yet persisted.
#[derive(Clone)]
pub struct Record {
    record_type: Arc<RecordType>,
    attributes: BTreeMap<String, Value>,
    original: BTreeMap<String, Value>,
    exists: bool,
}

impl Record {
    pub fn new(record_type: &Arc<RecordType>) -> Self {
        let attributes: BTreeMap<String, Value> = record_type
            .schema()
            .schema()
            .columns()
            .iter()
            .map(|c| (c.name.clone(), Value::Null))
            .collect();

        Self {
            record_type: record_type.clone(),
            attributes,
            original: BTreeMap::new(),
            exists: false,
        }
    }

    pub(crate) fn from_row(record_type: &Arc<RecordType>, row: Row) -> Self {
        let mut record = Self::new(record_type);
        record.exists = true;
        record.load_row(row);
        record
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.record_type
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn key(&self) -> &Value {
        self.get(self.record_type.key_name()).unwrap_or(&Value::Null)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        match self.attributes.get_mut(column) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(DbError::ColumnNotFound(
                column.to_string(),
                self.record_type.table().to_string(),
            )),
        }
    }

    pub fn fill<'a>(&mut self, attributes: impl IntoIterator<Item = (&'a str, Value)>) -> Result<()> {
        for (column, value) in attributes {
            self.set(column, value)?;
        }
        Ok(())
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Columns whose value differs from what was last loaded or saved.
    pub fn dirty(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(column, value)| self.original.get(*column) != Some(*value))
            .map(|(column, _)| column.as_str())
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty().is_empty()
    }

    /// Persist the record.
    ///
    /// Returns `Ok(false)` when a `saving`, `creating` or `updating` guard
    /// vetoes, or when the row no longer exists in the table. Storage errors
    /// are returned as they are.
    pub fn save(&mut self, db: &Database) -> Result<bool> {
        let record_type = self.record_type.clone();
        let events = record_type.events();

        if !events.until(ModelEvent::Saving, self)? {
            return Ok(false);
        }

        let saved = if self.exists {
            self.perform_update(db)?
        } else {
            self.perform_insert(db)?
        };

        if saved {
            events.dispatch(ModelEvent::Saved, self)?;
        }

        Ok(saved)
    }

    /// Reload attributes from storage, bypassing query scopes.
    pub fn refresh(&mut self, db: &Database) -> Result<()> {
        match db.fetch_row(self.record_type.table(), self.key())? {
            Some(row) => {
                self.load_row(row);
                Ok(())
            }
            None => Err(DbError::RecordNotFound(
                self.record_type.table().to_string(),
                self.key().to_string(),
            )),
        }
    }

    fn perform_insert(&mut self, db: &Database) -> Result<bool> {
        let record_type = self.record_type.clone();

        if !record_type.events().until(ModelEvent::Creating, self)? {
            return Ok(false);
        }

        if record_type.uses_timestamps() {
            let now = db.fresh_timestamp_string();
            for column in [CREATED_AT, UPDATED_AT] {
                if self.get(column).is_none_or(Value::is_null) {
                    self.set(column, now.clone())?;
                }
            }
        }

        let stored = db.insert_row(record_type.table(), self.to_row())?;
        self.exists = true;
        self.load_row(stored);
        debug!(record_type = record_type.name(), key = %self.key(), "record inserted");

        record_type.events().dispatch(ModelEvent::Created, self)?;
        Ok(true)
    }

    fn perform_update(&mut self, db: &Database) -> Result<bool> {
        let record_type = self.record_type.clone();

        if !self.is_dirty() {
            return Ok(true);
        }

        if !record_type.events().until(ModelEvent::Updating, self)? {
            return Ok(false);
        }

        if record_type.uses_timestamps() && !self.dirty().contains(&UPDATED_AT) {
            self.set(UPDATED_AT, db.fresh_timestamp_string())?;
        }

        let key = self.original.get(record_type.key_name()).cloned().unwrap_or(Value::Null);
        let Some(stored) = db.update_row(record_type.table(), &key, self.to_row())? else {
            debug!(record_type = record_type.name(), key = %key, "record vanished before update");
            return Ok(false);
        };
        self.load_row(stored);

        record_type.events().dispatch(ModelEvent::Updated, self)?;
        Ok(true)
    }

    fn to_row(&self) -> Row {
        self.record_type
            .schema()
            .schema()
            .columns()
            .iter()
            .map(|c| self.attributes.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn load_row(&mut self, row: Row) {
        for (column, value) in self.record_type.schema().schema().columns().iter().zip(row) {
            self.attributes.insert(column.name.clone(), value);
        }
        self.original = self.attributes.clone();
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.record_type.name())
            .field("exists", &self.exists)
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use crate::model::{Hook, HookDecision, RecordTypeBuilder};
    use std::sync::Mutex;

    fn setup(timestamps: bool) -> (Database, Arc<RecordType>) {
        let ty = RecordTypeBuilder::new("Post", "posts")
            .column(Column::new("id", DataType::Integer))
            .column(Column::new("title", DataType::Text))
            .timestamps(timestamps)
            .build()
            .unwrap();
        let db = Database::new();
        db.create_table(&ty).unwrap();
        (db, ty)
    }

    #[test]
    fn test_save_inserts_then_updates() {
        let (db, ty) = setup(false);
        let mut post = ty.make();
        post.set("title", "first").unwrap();

        assert!(post.save(&db).unwrap());
        assert!(post.exists());
        assert_eq!(post.key(), &Value::Integer(1));
        assert!(!post.is_dirty());

        post.set("title", "second").unwrap();
        assert_eq!(post.dirty(), vec!["title"]);
        assert!(post.save(&db).unwrap());

        let mut reloaded = Record::new(&ty);
        reloaded.set("id", 1).unwrap();
        reloaded.refresh(&db).unwrap();
        assert_eq!(reloaded.get("title"), Some(&Value::from("second")));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let (_, ty) = setup(false);
        let mut post = ty.make();
        assert!(matches!(post.set("nope", 1), Err(DbError::ColumnNotFound(..))));
    }

    #[test]
    fn test_saving_veto_skips_persistence() {
        let (db, ty) = setup(false);
        ty.on_saving(Hook::guard(|_| HookDecision::Veto)).unwrap();

        let mut post = ty.make();
        post.set("title", "draft").unwrap();
        assert!(!post.save(&db).unwrap());
        assert!(!post.exists());
        assert_eq!(db.query(&ty).count().unwrap(), 0);
    }

    #[test]
    fn test_save_fires_lifecycle_in_order() {
        let (db, ty) = setup(false);
        let log = Arc::new(Mutex::new(Vec::new()));
        for event in [ModelEvent::Saving, ModelEvent::Creating, ModelEvent::Created, ModelEvent::Saved] {
            let log = log.clone();
            ty.listen(event, Hook::notify(move |_| log.lock().unwrap().push(event.name())))
                .unwrap();
        }

        let mut post = ty.make();
        post.set("title", "x").unwrap();
        post.save(&db).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["saving", "creating", "created", "saved"]);
    }

    #[test]
    fn test_timestamps_are_maintained() {
        let (db, ty) = setup(true);
        let mut post = ty.make();
        post.set("title", "x").unwrap();
        post.save(&db).unwrap();

        assert!(matches!(post.get(CREATED_AT), Some(Value::Timestamp(_))));
        assert!(matches!(post.get(UPDATED_AT), Some(Value::Timestamp(_))));
    }

    #[test]
    fn test_clean_update_is_a_successful_no_op() {
        let (db, ty) = setup(false);
        let mut post = ty.make();
        post.set("title", "x").unwrap();
        post.save(&db).unwrap();
        ty.listen(ModelEvent::Updating, Hook::guard(|_| HookDecision::Veto)).unwrap();

        assert!(post.save(&db).unwrap());
    }
}
