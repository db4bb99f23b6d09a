use crate::core::{Column, DbError, Result, Row, Schema, Value, validate_identifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    next_key: i64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            next_key: 1,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Insert a row, assigning the next integer key when the primary key is NULL.
    ///
    /// Returns the internal row id together with the row as stored.
    pub fn insert(&mut self, mut row: Row) -> Result<(usize, Row)> {
        if let Some(pk) = self.schema.schema().primary_key_index()
            && row.get(pk).is_some_and(Value::is_null)
        {
            row[pk] = Value::Integer(self.next_key);
        }

        self.validate_row(&row)?;
        self.check_key_uniqueness(&row, None)?;

        if let Some(pk) = self.schema.schema().primary_key_index()
            && let Value::Integer(key) = row[pk]
        {
            // Saturates at i64::MAX; the next auto key then collides and is rejected.
            self.next_key = self.next_key.max(key.saturating_add(1));
        }

        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, row.clone());

        Ok((id, row))
    }

    pub fn update(&mut self, id: usize, new_row: Row) -> Result<bool> {
        self.validate_row(&new_row)?;
        self.check_key_uniqueness(&new_row, Some(id))?;

        match self.rows.get_mut(&id) {
            Some(row) => {
                *row = new_row;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace several rows at once.
    ///
    /// Every new row is validated, and its key checked against the untouched
    /// rows and against the rest of the batch, before any row is written. On
    /// error the table is left as it was.
    pub fn update_batch(&mut self, updates: Vec<(usize, Row)>) -> Result<usize> {
        for (_, row) in &updates {
            self.validate_row(row)?;
        }

        if let Some(pk) = self.schema.schema().primary_key_index() {
            let touched: Vec<usize> = updates.iter().map(|(id, _)| *id).collect();
            let mut keys: Vec<&Value> = self
                .rows
                .iter()
                .filter(|(id, _)| !touched.contains(id))
                .map(|(_, row)| &row[pk])
                .collect();

            for (_, row) in &updates {
                let key = &row[pk];
                if keys.contains(&key) {
                    return Err(self.duplicate_key(pk, key));
                }
                keys.push(key);
            }
        }

        let mut affected = 0;
        for (id, row) in updates {
            if let Some(slot) = self.rows.get_mut(&id) {
                *slot = row;
                affected += 1;
            }
        }
        Ok(affected)
    }

    pub fn delete(&mut self, id: usize) -> bool {
        self.rows.remove(&id).is_some()
    }

    pub fn scan(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }

    pub fn scan_with_ids(&self) -> Vec<(usize, Row)> {
        self.rows.iter().map(|(id, row)| (*id, row.clone())).collect()
    }

    pub fn get_row(&self, id: usize) -> Option<&Row> {
        self.rows.get(&id)
    }

    /// Locate a row by primary key value.
    pub fn find_by_key(&self, key: &Value) -> Option<(usize, Row)> {
        let pk = self.schema.schema().primary_key_index()?;
        self.rows
            .iter()
            .find(|(_, row)| &row[pk] == key)
            .map(|(id, row)| (*id, row.clone()))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn check_key_uniqueness(&self, row: &Row, ignore_id: Option<usize>) -> Result<()> {
        let Some(pk) = self.schema.schema().primary_key_index() else {
            return Ok(());
        };
        let key = &row[pk];

        let duplicate = self
            .rows
            .iter()
            .any(|(id, existing)| Some(*id) != ignore_id && &existing[pk] == key);

        if duplicate {
            return Err(self.duplicate_key(pk, key));
        }
        Ok(())
    }

    fn duplicate_key(&self, pk: usize, key: &Value) -> DbError {
        DbError::ConstraintViolation(format!(
            "Unique constraint violation: Column '{}' already contains value {}",
            self.schema.schema().columns()[pk].name,
            key
        ))
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        self.schema.validate_names()?;
        if self.schema.columns().iter().filter(|c| c.primary_key).count() > 1 {
            return Err(DbError::UnsupportedOperation(format!(
                "Table '{}' declares more than one primary key",
                self.name
            )));
        }
        Ok(())
    }

    /// Cast every value to its column type (text timestamps are parsed here).
    pub fn cast_row(&self, row: &Row, date_format: &str) -> Result<Row> {
        self.schema
            .columns()
            .iter()
            .zip(row.iter())
            .map(|(column, value)| column.data_type.cast_value(value, date_format))
            .collect()
    }
}
