use tracing::debug;

use super::expires::ExpirationColumns;
use crate::core::{Result, Value};
use crate::model::RecordType;
use crate::query::{Boolean, Clause, CompareOp, Extensions, Predicate, Query, Scope};

/// Hides expired rows from every query of a record type.
///
/// Adds `(expired_at > now OR expired_at IS NULL)` to each query and provides
/// the `expire`, `unexpire`, `with_expired` and `only_expired` operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpirationScope;

impl ExpirationScope {
    pub const NAME: &'static str = "expiration";

    pub const EXTENSIONS: [&'static str; 4] = ["expire", "unexpire", "with_expired", "only_expired"];

    pub fn register_extensions(&self, extensions: &mut Extensions) {
        for operation in Self::EXTENSIONS {
            extensions.register(operation, Self::NAME);
        }
    }

    /// The expired-at column as it must appear in this query: qualified with
    /// the table name as soon as the query joins anything.
    pub fn resolve_expired_at_column(query: &Query<'_>) -> String {
        let record_type = query.record_type();
        if query.has_joins() {
            record_type.qualified_expired_at_column()
        } else {
            record_type.expired_at_column().to_string()
        }
    }

    /// Stamp every matching row with the current time. Record hooks do not fire.
    pub fn expire(query: Query<'_>) -> Result<usize> {
        let column = Self::resolve_expired_at_column(&query);
        let now = query.db().fresh_timestamp_string();
        let affected = query.update([(column.as_str(), Value::Text(now))])?;
        debug!(record_type = query.record_type().name(), affected, "bulk expire");
        Ok(affected)
    }

    /// Clear the expiration of every matching row, expired ones included.
    /// Record hooks do not fire.
    pub fn unexpire(query: Query<'_>) -> Result<usize> {
        let query = Self::with_expired(query);
        let column = Self::resolve_expired_at_column(&query);
        let affected = query.update([(column.as_str(), Value::Null)])?;
        debug!(record_type = query.record_type().name(), affected, "bulk unexpire");
        Ok(affected)
    }

    pub fn with_expired(query: Query<'_>) -> Query<'_> {
        query.without_global_scope(Self::NAME)
    }

    /// Only rows whose expiration lies strictly in the past.
    pub fn only_expired(query: Query<'_>) -> Query<'_> {
        let column = Self::resolve_expired_at_column(&query);
        let now = query.db().now();
        Self::with_expired(query)
            .where_not_null(&column)
            .where_cmp(&column, CompareOp::Lt, now)
    }
}

impl Scope for ExpirationScope {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, query: &mut Query<'_>, _record_type: &RecordType) -> Result<()> {
        let column = Self::resolve_expired_at_column(query);
        let now = Value::Timestamp(query.db().now());

        query.push_where(
            Boolean::And,
            Predicate::Nested(vec![
                Clause::and(Predicate::Compare {
                    column: column.clone(),
                    op: CompareOp::Gt,
                    value: now,
                }),
                Clause::or(Predicate::Null { column, negated: false }),
            ]),
        );
        Ok(())
    }

    fn extend(&self, extensions: &mut Extensions) {
        self.register_extensions(extensions);
    }
}

/// The expiration operations on a query, available when the record type
/// uses [`Expires`](super::Expires).
pub trait ExpirationQueryExt: Sized {
    fn expire(self) -> Result<usize>;
    fn unexpire(self) -> Result<usize>;
    fn with_expired(self) -> Result<Self>;
    fn only_expired(self) -> Result<Self>;
}

impl ExpirationQueryExt for Query<'_> {
    fn expire(self) -> Result<usize> {
        self.require_extension("expire")?;
        ExpirationScope::expire(self)
    }

    fn unexpire(self) -> Result<usize> {
        self.require_extension("unexpire")?;
        ExpirationScope::unexpire(self)
    }

    fn with_expired(self) -> Result<Self> {
        self.require_extension("with_expired")?;
        Ok(ExpirationScope::with_expired(self))
    }

    fn only_expired(self) -> Result<Self> {
        self.require_extension("only_expired")?;
        Ok(ExpirationScope::only_expired(self))
    }
}
