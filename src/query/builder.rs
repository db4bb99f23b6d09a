use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use super::executor;
use super::predicate::{Boolean, Clause, CompareOp, DisplayClauses, Predicate, has_top_level_or};
use super::scope::{Extensions, Scope};
use crate::core::{DbError, Result, Value};
use crate::facade::Database;
use crate::model::{Record, RecordType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Inner join of another table on `left op right`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub left: String,
    pub op: CompareOp,
    pub right: String,
}

/// Query over one record type.
///
/// Builder methods take and return the query by value. Global scopes are
/// kept pending and applied once, right before execution.
#[derive(Clone)]
pub struct Query<'db> {
    db: &'db Database,
    record_type: Arc<RecordType>,
    wheres: Vec<Clause>,
    joins: Vec<Join>,
    orders: Vec<(String, Direction)>,
    limit: Option<usize>,
    scopes: Vec<Arc<dyn Scope>>,
    removed_scopes: Vec<String>,
    extensions: Extensions,
}

impl<'db> Query<'db> {
    /// Default query path: every global scope of the type is registered.
    pub fn new(db: &'db Database, record_type: Arc<RecordType>) -> Self {
        let scopes = record_type.global_scopes().to_vec();
        scopes
            .into_iter()
            .fold(Self::bare(db, record_type), |query, scope| query.with_global_scope(scope))
    }

    pub fn bare(db: &'db Database, record_type: Arc<RecordType>) -> Self {
        Self {
            db,
            record_type,
            wheres: Vec::new(),
            joins: Vec::new(),
            orders: Vec::new(),
            limit: None,
            scopes: Vec::new(),
            removed_scopes: Vec::new(),
            extensions: Extensions::new(),
        }
    }

    pub fn db(&self) -> &'db Database {
        self.db
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.record_type
    }

    pub fn wheres(&self) -> &[Clause] {
        &self.wheres
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    pub fn orders(&self) -> &[(String, Direction)] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    // ========================================
    // Global scopes and extensions
    // ========================================

    /// Register a scope on this query only. Same name replaces.
    pub fn with_global_scope(mut self, scope: Arc<dyn Scope>) -> Self {
        scope.extend(&mut self.extensions);
        self.removed_scopes.retain(|name| name != scope.name());
        match self.scopes.iter_mut().find(|s| s.name() == scope.name()) {
            Some(existing) => *existing = scope,
            None => self.scopes.push(scope),
        }
        self
    }

    /// Lift one global scope for this query. Its extensions stay available.
    pub fn without_global_scope(mut self, name: &str) -> Self {
        self.scopes.retain(|scope| scope.name() != name);
        if !self.removed_scopes.iter().any(|removed| removed == name) {
            self.removed_scopes.push(name.to_string());
        }
        debug!(record_type = self.record_type.name(), scope = name, "global scope removed");
        self
    }

    pub fn without_global_scopes(self) -> Self {
        let names: Vec<&'static str> = self.scopes.iter().map(|s| s.name()).collect();
        names.into_iter().fold(self, |query, name| query.without_global_scope(name))
    }

    pub fn has_global_scope(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.name() == name)
    }

    pub fn removed_scopes(&self) -> &[String] {
        &self.removed_scopes
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// The scope providing `operation`, or an error when none registered it.
    pub fn require_extension(&self, operation: &str) -> Result<&'static str> {
        self.extensions.provider(operation).ok_or_else(|| {
            DbError::UnsupportedOperation(format!(
                "Query operation '{}' is not registered for record type '{}'",
                operation,
                self.record_type.name()
            ))
        })
    }

    // ========================================
    // Predicates
    // ========================================

    pub fn push_where(&mut self, boolean: Boolean, predicate: Predicate) {
        self.wheres.push(Clause { boolean, predicate });
    }

    pub fn where_cmp(mut self, column: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        self.push_where(Boolean::And, compare(column, op, value));
        self
    }

    pub fn or_where_cmp(mut self, column: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        self.push_where(Boolean::Or, compare(column, op, value));
        self
    }

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.where_cmp(column, CompareOp::Eq, value)
    }

    pub fn or_where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.or_where_cmp(column, CompareOp::Eq, value)
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.push_where(Boolean::And, Predicate::Null { column: column.to_string(), negated: false });
        self
    }

    pub fn or_where_null(mut self, column: &str) -> Self {
        self.push_where(Boolean::Or, Predicate::Null { column: column.to_string(), negated: false });
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.push_where(Boolean::And, Predicate::Null { column: column.to_string(), negated: true });
        self
    }

    /// Parenthesized group: `AND ( ... )`.
    pub fn where_group(self, build: impl FnOnce(Query<'db>) -> Query<'db>) -> Self {
        self.group(Boolean::And, build)
    }

    /// Parenthesized group: `OR ( ... )`.
    pub fn or_where_group(self, build: impl FnOnce(Query<'db>) -> Query<'db>) -> Self {
        self.group(Boolean::Or, build)
    }

    fn group(mut self, boolean: Boolean, build: impl FnOnce(Query<'db>) -> Query<'db>) -> Self {
        let inner = build(Query::bare(self.db, self.record_type.clone()));
        if !inner.wheres.is_empty() {
            self.push_where(boolean, Predicate::Nested(inner.wheres));
        }
        self
    }

    // ========================================
    // Joins, ordering, limits
    // ========================================

    pub fn join(mut self, table: &str, left: &str, op: CompareOp, right: &str) -> Self {
        self.joins.push(Join {
            table: table.to_string(),
            left: left.to_string(),
            op,
            right: right.to_string(),
        });
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.orders.push((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    // ========================================
    // Execution
    // ========================================

    /// A copy of this query with all pending global scopes applied.
    ///
    /// Caller predicates containing a top-level OR are wrapped in one group
    /// first, and so is each scope's contribution, so that everything joins
    /// with AND at the top level.
    pub fn prepared(&self) -> Result<Query<'db>> {
        let mut query = self.clone();
        if query.scopes.is_empty() {
            return Ok(query);
        }

        let scopes = std::mem::take(&mut query.scopes);
        let record_type = query.record_type.clone();
        let caller = std::mem::take(&mut query.wheres);

        let mut combined = group_if_or(caller);
        for scope in &scopes {
            scope.apply(&mut query, &record_type)?;
            combined.extend(group_if_or(std::mem::take(&mut query.wheres)));
            debug!(record_type = record_type.name(), scope = scope.name(), "global scope applied");
        }
        if let Some(first) = combined.first_mut() {
            first.boolean = Boolean::And;
        }

        query.wheres = combined;
        Ok(query)
    }

    pub fn get(&self) -> Result<Vec<Record>> {
        let query = self.prepared()?;
        query.log("select");
        let storage = self.db.read_storage()?;
        let rows = executor::matching_rows(&storage, &query)?;
        Ok(rows
            .into_iter()
            .map(|(_, row)| Record::from_row(&self.record_type, row))
            .collect())
    }

    pub fn first(&self) -> Result<Option<Record>> {
        Ok(self.clone().limit(1).get()?.into_iter().next())
    }

    pub fn count(&self) -> Result<usize> {
        let query = self.prepared()?;
        let storage = self.db.read_storage()?;
        Ok(executor::matching_rows(&storage, &query)?.len())
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.count()? > 0)
    }

    /// Bulk update of every matching row. No record events fire.
    ///
    /// Columns may be qualified with the base table name. Types keeping
    /// timestamps also get `updated_at` set unless it is assigned explicitly.
    pub fn update<'a>(&self, assignments: impl IntoIterator<Item = (&'a str, Value)>) -> Result<usize> {
        let query = self.prepared()?;
        query.log("update");
        let assignments: Vec<(&str, Value)> = assignments.into_iter().collect();
        let mut storage = self.db.write_storage()?;
        let affected = executor::update_rows(&mut storage, &query, assignments)?;
        debug!(record_type = self.record_type.name(), affected, "bulk update");
        Ok(affected)
    }

    /// Bulk delete of every matching row. No record events fire.
    pub fn delete(&self) -> Result<usize> {
        let query = self.prepared()?;
        query.log("delete");
        let mut storage = self.db.write_storage()?;
        let affected = executor::delete_rows(&mut storage, &query)?;
        debug!(record_type = self.record_type.name(), affected, "bulk delete");
        Ok(affected)
    }

    /// SQL text of the query as it would run, scopes included.
    pub fn to_sql(&self) -> Result<String> {
        let query = self.prepared()?;
        let table = query.record_type.table();
        let mut sql = format!("SELECT {}.* FROM {}", table, table);

        for join in &query.joins {
            let _ = write!(sql, " INNER JOIN {} ON {} {} {}", join.table, join.left, join.op, join.right);
        }
        if !query.wheres.is_empty() {
            let _ = write!(sql, " WHERE {}", DisplayClauses(&query.wheres));
        }
        if !query.orders.is_empty() {
            let orders: Vec<String> = query
                .orders
                .iter()
                .map(|(column, direction)| match direction {
                    Direction::Asc => format!("{} ASC", column),
                    Direction::Desc => format!("{} DESC", column),
                })
                .collect();
            let _ = write!(sql, " ORDER BY {}", orders.join(", "));
        }
        if let Some(limit) = query.limit {
            let _ = write!(sql, " LIMIT {}", limit);
        }
        Ok(sql)
    }

    fn log(&self, kind: &str) {
        if self.db.config().log_queries {
            debug!(
                kind,
                table = self.record_type.table(),
                wheres = %DisplayClauses(&self.wheres),
                "executing query"
            );
        }
    }
}

fn compare(column: &str, op: CompareOp, value: impl Into<Value>) -> Predicate {
    Predicate::Compare {
        column: column.to_string(),
        op,
        value: value.into(),
    }
}

fn group_if_or(clauses: Vec<Clause>) -> Vec<Clause> {
    if has_top_level_or(&clauses) {
        vec![Clause::and(Predicate::Nested(clauses))]
    } else {
        clauses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use crate::model::RecordTypeBuilder;

    struct PublishedOnly;

    impl Scope for PublishedOnly {
        fn name(&self) -> &'static str {
            "published"
        }

        fn apply(&self, query: &mut Query<'_>, _record_type: &RecordType) -> Result<()> {
            query.push_where(Boolean::And, compare("published", CompareOp::Eq, true));
            Ok(())
        }

        fn extend(&self, extensions: &mut Extensions) {
            extensions.register("with_drafts", "published");
        }
    }

    fn setup() -> (Database, Arc<RecordType>) {
        let ty = RecordTypeBuilder::new("Post", "posts")
            .column(Column::new("id", DataType::Integer))
            .column(Column::new("title", DataType::Text))
            .column(Column::new("published", DataType::Boolean))
            .global_scope(Arc::new(PublishedOnly))
            .build()
            .unwrap();
        let db = Database::new();
        db.create_table(&ty).unwrap();
        for (title, published) in [("a", true), ("b", false), ("c", true)] {
            db.create(&ty, [("title", Value::from(title)), ("published", Value::from(published))])
                .unwrap();
        }
        (db, ty)
    }

    fn titles(records: Vec<Record>) -> Vec<String> {
        records
            .iter()
            .map(|r| r.get("title").unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_scope_applied_by_default() {
        let (db, ty) = setup();
        assert_eq!(titles(db.query(&ty).get().unwrap()), vec!["a", "c"]);
        assert_eq!(db.query_without_scopes(&ty).count().unwrap(), 3);
    }

    #[test]
    fn test_without_global_scope() {
        let (db, ty) = setup();
        let query = db.query(&ty).without_global_scope("published");
        assert_eq!(query.count().unwrap(), 3);
        assert_eq!(query.removed_scopes(), ["published".to_string()]);
        assert!(query.extensions().contains("with_drafts"));
    }

    #[test]
    fn test_caller_or_is_grouped_before_scope() {
        let (db, ty) = setup();
        let query = db.query(&ty).where_eq("title", "a").or_where_eq("title", "b");

        assert_eq!(titles(query.get().unwrap()), vec!["a"]);
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT posts.* FROM posts WHERE (title = 'a' OR title = 'b') AND published = true"
        );
    }

    #[test]
    fn test_scope_is_applied_once_per_execution() {
        let (db, ty) = setup();
        let prepared = db.query(&ty).prepared().unwrap();
        assert_eq!(prepared.wheres().len(), 1);
        assert_eq!(prepared.prepared().unwrap().wheres().len(), 1);
    }

    #[test]
    fn test_where_group_and_ordering() {
        let (db, ty) = setup();
        let records = db
            .query_without_scopes(&ty)
            .where_group(|q| q.where_eq("title", "a").or_where_eq("title", "c"))
            .order_by("title", Direction::Desc)
            .get()
            .unwrap();
        assert_eq!(titles(records), vec!["c", "a"]);
    }

    #[test]
    fn test_missing_extension_is_unsupported() {
        let (db, ty) = setup();
        let err = db.query_without_scopes(&ty).require_extension("with_drafts").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedOperation(_)));
        assert_eq!(db.query(&ty).require_extension("with_drafts").unwrap(), "published");
    }

    #[test]
    fn test_bulk_update_respects_scope() {
        let (db, ty) = setup();
        let affected = db.query(&ty).update([("title", Value::from("z"))]).unwrap();
        assert_eq!(affected, 2);
        assert_eq!(db.query_without_scopes(&ty).where_eq("title", "z").count().unwrap(), 2);
    }

    #[test]
    fn test_failed_bulk_update_writes_nothing() {
        let (db, ty) = setup();
        let err = db
            .query_without_scopes(&ty)
            .update([("id", Value::from(1)), ("title", Value::from("z"))])
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert_eq!(db.query_without_scopes(&ty).where_eq("title", "z").count().unwrap(), 0);
    }

    #[test]
    fn test_order_by_joined_column() {
        let (db, ty) = setup();
        let authors = RecordTypeBuilder::new("Author", "authors")
            .column(Column::new("id", DataType::Integer))
            .column(Column::new("post_id", DataType::Integer))
            .column(Column::new("name", DataType::Text))
            .build()
            .unwrap();
        db.create_table(&authors).unwrap();
        for (post_id, name) in [(1, "zoe"), (2, "max"), (3, "ann")] {
            db.create(&authors, [("post_id", Value::from(post_id)), ("name", Value::from(name))])
                .unwrap();
        }

        let records = db
            .query_without_scopes(&ty)
            .join("authors", "posts.id", CompareOp::Eq, "authors.post_id")
            .order_by("authors.name", Direction::Asc)
            .get()
            .unwrap();
        assert_eq!(titles(records), vec!["c", "b", "a"]);

        let records = db
            .query(&ty)
            .join("authors", "posts.id", CompareOp::Eq, "authors.post_id")
            .order_by("authors.name", Direction::Desc)
            .limit(1)
            .get()
            .unwrap();
        assert_eq!(titles(records), vec!["a"]);
    }

    #[test]
    fn test_bulk_delete() {
        let (db, ty) = setup();
        assert_eq!(db.query_without_scopes(&ty).where_eq("published", false).delete().unwrap(), 1);
        assert_eq!(db.query_without_scopes(&ty).count().unwrap(), 2);
    }

    #[test]
    fn test_limit_and_first() {
        let (db, ty) = setup();
        let first = db.query(&ty).order_by("title", Direction::Desc).first().unwrap().unwrap();
        assert_eq!(first.get("title"), Some(&Value::from("c")));
        assert_eq!(db.query_without_scopes(&ty).limit(2).count().unwrap(), 2);
    }
}
