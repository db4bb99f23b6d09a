use std::cmp::Ordering;
use std::fmt;

use crate::core::{DbError, Result, Row, Schema, Value, split_qualified};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub(crate) fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::LtEq => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::GtEq => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        };
        f.write_str(op)
    }
}

/// How a clause attaches to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { column: String, op: CompareOp, value: Value },
    Null { column: String, negated: bool },
    Nested(Vec<Clause>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub boolean: Boolean,
    pub predicate: Predicate,
}

impl Clause {
    pub fn and(predicate: Predicate) -> Self {
        Self { boolean: Boolean::And, predicate }
    }

    pub fn or(predicate: Predicate) -> Self {
        Self { boolean: Boolean::Or, predicate }
    }
}

/// `true` when any clause after the first attaches with OR.
pub fn has_top_level_or(clauses: &[Clause]) -> bool {
    clauses.iter().skip(1).any(|c| c.boolean == Boolean::Or)
}

/// Evaluate a clause list with SQL precedence: AND binds tighter than OR.
/// An empty list matches everything.
pub fn evaluate_clauses(clauses: &[Clause], ctx: &RowContext<'_>) -> Result<bool> {
    let mut matched = false;
    let mut current = true;

    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 && clause.boolean == Boolean::Or {
            matched |= current;
            current = true;
        }
        if current {
            current = clause.predicate.evaluate(ctx)?;
        }
    }

    Ok(matched || current)
}

impl Predicate {
    pub fn evaluate(&self, ctx: &RowContext<'_>) -> Result<bool> {
        match self {
            Self::Compare { column, op, value } => {
                let actual = ctx.resolve(column)?;
                // Comparisons involving NULL are never true
                if actual.is_null() || value.is_null() {
                    return Ok(false);
                }
                Ok(op.holds(actual.compare(value)?))
            }
            Self::Null { column, negated } => {
                let is_null = ctx.resolve(column)?.is_null();
                Ok(is_null != *negated)
            }
            Self::Nested(clauses) => evaluate_clauses(clauses, ctx),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { column, op, value } => {
                write!(f, "{} {} {}", column, op, value.to_sql_literal())
            }
            Self::Null { column, negated: false } => write!(f, "{} IS NULL", column),
            Self::Null { column, negated: true } => write!(f, "{} IS NOT NULL", column),
            Self::Nested(clauses) => write!(f, "({})", DisplayClauses(clauses)),
        }
    }
}

pub struct DisplayClauses<'a>(pub &'a [Clause]);

impl fmt::Display for DisplayClauses<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.0.iter().enumerate() {
            if i > 0 {
                match clause.boolean {
                    Boolean::And => f.write_str(" AND ")?,
                    Boolean::Or => f.write_str(" OR ")?,
                }
            }
            write!(f, "{}", clause.predicate)?;
        }
        Ok(())
    }
}

/// The rows of one candidate result: the base row plus one row per join.
pub struct RowContext<'a> {
    entries: Vec<(&'a str, &'a Schema, &'a Row)>,
}

impl<'a> RowContext<'a> {
    pub fn new(table: &'a str, schema: &'a Schema, row: &'a Row) -> Self {
        Self {
            entries: vec![(table, schema, row)],
        }
    }

    pub fn with(&self, table: &'a str, schema: &'a Schema, row: &'a Row) -> Self {
        let mut entries = self.entries.clone();
        entries.push((table, schema, row));
        Self { entries }
    }

    /// Look up `table.column` exactly, or a bare column across every table.
    /// A bare name found in more than one table is ambiguous.
    pub fn resolve(&self, name: &str) -> Result<&'a Value> {
        match split_qualified(name) {
            (Some(table), column) => {
                let &(_, schema, row) = self
                    .entries
                    .iter()
                    .find(|(t, _, _)| *t == table)
                    .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
                let idx = schema
                    .find_column_index(column)
                    .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), table.to_string()))?;
                Ok(&row[idx])
            }
            (None, column) => {
                let mut found = None;
                for &(_, schema, row) in &self.entries {
                    if let Some(idx) = schema.find_column_index(column) {
                        if found.is_some() {
                            return Err(DbError::AmbiguousColumn(column.to_string()));
                        }
                        found = Some(&row[idx]);
                    }
                }
                found.ok_or_else(|| {
                    DbError::ColumnNotFound(column.to_string(), self.entries[0].0.to_string())
                })
            }
        }
    }
}
