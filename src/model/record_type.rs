use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::events::{EventDispatcher, Hook, ModelEvent};
use super::Record;
use crate::core::{Column, DataType, DbError, Result, validate_identifier};
use crate::query::Scope;
use crate::storage::TableSchema;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Reusable capability attached to a record type while it is built.
///
/// Every behavior's `on_type_initialized` runs first, then every
/// `on_booted`, once per type.
pub trait Behavior: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_type_initialized(&self, _builder: &mut RecordTypeBuilder) -> Result<()> {
        Ok(())
    }

    fn on_booted(&self, _builder: &mut RecordTypeBuilder) -> Result<()> {
        Ok(())
    }
}

/// Configuration of one record type: table layout, global query scopes and
/// lifecycle listeners. Built once and shared behind an `Arc`.
pub struct RecordType {
    name: String,
    schema: TableSchema,
    key_name: String,
    timestamps: bool,
    constants: BTreeMap<String, String>,
    scopes: Vec<Arc<dyn Scope>>,
    behaviors: Vec<&'static str>,
    observable: Vec<ModelEvent>,
    events: EventDispatcher,
}

impl RecordType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }

    /// Named per-type setting, e.g. an overridden column name.
    pub fn constant(&self, name: &str) -> Option<&str> {
        self.constants.get(name).map(String::as_str)
    }

    pub fn global_scopes(&self) -> &[Arc<dyn Scope>] {
        &self.scopes
    }

    pub fn global_scope(&self, name: &str) -> Option<&Arc<dyn Scope>> {
        self.scopes.iter().find(|scope| scope.name() == name)
    }

    pub fn has_behavior(&self, name: &str) -> bool {
        self.behaviors.iter().any(|b| *b == name)
    }

    /// Prefix a column with the table name. Already qualified names pass through.
    pub fn qualify_column(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", self.table(), column)
        }
    }

    pub fn observable_events(&self) -> &[ModelEvent] {
        &self.observable
    }

    pub fn is_observable(&self, event: ModelEvent) -> bool {
        self.observable.contains(&event)
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Register a listener. The event must be observable on this type.
    pub fn listen(&self, event: ModelEvent, hook: Hook) -> Result<()> {
        if !self.is_observable(event) {
            return Err(DbError::UnknownEvent(event.name().to_string(), self.name.clone()));
        }
        self.events.listen(event, hook)
    }

    pub fn on_saving(&self, hook: Hook) -> Result<()> {
        self.listen(ModelEvent::Saving, hook)
    }

    pub fn on_saved(&self, hook: Hook) -> Result<()> {
        self.listen(ModelEvent::Saved, hook)
    }

    /// A fresh, unsaved record of this type.
    pub fn make(self: &Arc<Self>) -> Record {
        Record::new(self)
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("name", &self.name)
            .field("table", &self.table())
            .field("key_name", &self.key_name)
            .field("timestamps", &self.timestamps)
            .field("scopes", &self.scopes.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("behaviors", &self.behaviors)
            .finish()
    }
}

pub struct RecordTypeBuilder {
    name: String,
    table: String,
    key_name: String,
    columns: Vec<Column>,
    timestamps: bool,
    constants: BTreeMap<String, String>,
    scopes: Vec<Arc<dyn Scope>>,
    behaviors: Vec<Box<dyn Behavior>>,
    observable: Vec<ModelEvent>,
}

impl RecordTypeBuilder {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key_name: "id".to_string(),
            columns: Vec::new(),
            timestamps: false,
            constants: BTreeMap::new(),
            scopes: Vec::new(),
            behaviors: Vec::new(),
            observable: ModelEvent::BUILTIN.to_vec(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = key_name.into();
        self
    }

    /// Maintain `created_at` / `updated_at` on save and bulk update.
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn constant(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    pub fn get_constant(&self, name: &str) -> Option<&str> {
        self.constants.get(name).map(String::as_str)
    }

    pub fn behavior(mut self, behavior: impl Behavior + 'static) -> Self {
        if !self.behaviors.iter().any(|b| b.name() == behavior.name()) {
            self.behaviors.push(Box::new(behavior));
        }
        self
    }

    /// Register a scope applied to every query of the type. A scope with the
    /// same name replaces the earlier one in place.
    pub fn add_global_scope(&mut self, scope: Arc<dyn Scope>) {
        match self.scopes.iter_mut().find(|s| s.name() == scope.name()) {
            Some(existing) => *existing = scope,
            None => self.scopes.push(scope),
        }
    }

    pub fn global_scope(mut self, scope: Arc<dyn Scope>) -> Self {
        self.add_global_scope(scope);
        self
    }

    /// Make additional events listenable on the type.
    pub fn add_observable_events(&mut self, events: impl IntoIterator<Item = ModelEvent>) {
        for event in events {
            if !self.observable.contains(&event) {
                self.observable.push(event);
            }
        }
    }

    pub fn build(mut self) -> Result<Arc<RecordType>> {
        validate_identifier(&self.table)?;

        if self.timestamps {
            for column in [CREATED_AT, UPDATED_AT] {
                if !self.has_column(column) {
                    self.columns.push(Column::new(column, DataType::Timestamp));
                }
            }
        }

        let key_name = self.key_name.clone();
        let key = self
            .columns
            .iter_mut()
            .find(|c| c.name == key_name)
            .ok_or_else(|| DbError::ColumnNotFound(key_name.clone(), self.table.clone()))?;
        key.primary_key = true;
        key.nullable = false;
        for column in self.columns.iter_mut().filter(|c| c.name != key_name) {
            column.primary_key = false;
        }

        let behaviors = std::mem::take(&mut self.behaviors);
        for behavior in &behaviors {
            debug!(record_type = %self.name, behavior = behavior.name(), "initializing behavior");
            behavior.on_type_initialized(&mut self)?;
        }
        for behavior in &behaviors {
            behavior.on_booted(&mut self)?;
        }

        let schema = TableSchema::new(self.table, self.columns);
        schema.validate()?;

        info!(
            record_type = %self.name,
            table = schema.name(),
            scopes = self.scopes.len(),
            "record type booted"
        );

        Ok(Arc::new(RecordType {
            name: self.name,
            schema,
            key_name: self.key_name,
            timestamps: self.timestamps,
            constants: self.constants,
            scopes: self.scopes,
            behaviors: behaviors.iter().map(|b| b.name()).collect(),
            observable: self.observable,
            events: EventDispatcher::new(),
        }))
    }
}
