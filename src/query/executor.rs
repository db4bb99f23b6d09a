use std::cmp::Ordering;

use super::builder::{Direction, Join, Query};
use super::predicate::{RowContext, evaluate_clauses};
use crate::core::{DbError, Result, Row, Schema, Value, split_qualified};
use crate::model::UPDATED_AT;
use crate::storage::InMemoryStorage;

type JoinedTable<'s> = (&'s str, &'s Schema, Vec<Row>);

/// Base-table rows (with their row ids) that satisfy the query's joins and
/// predicates, ordered and limited. Scopes must already be applied.
///
/// Order keys may name joined columns. They are read from the first
/// combination of joined rows that matched.
pub(crate) fn matching_rows(storage: &InMemoryStorage, query: &Query<'_>) -> Result<Vec<(usize, Row)>> {
    let base = storage.get_table(query.record_type().table())?;
    let base_name = base.schema().name();
    let base_schema = base.schema().schema();

    let joined: Vec<JoinedTable<'_>> = query
        .joins()
        .iter()
        .map(|join| {
            let table = storage.get_table(&join.table)?;
            Ok((table.schema().name(), table.schema().schema(), table.scan()))
        })
        .collect::<Result<_>>()?;

    let mut matched = Vec::new();
    for (id, row) in base.scan_with_ids() {
        let ctx = RowContext::new(base_name, base_schema, &row);
        if let Some(keys) = first_match(&ctx, query, &joined, 0)? {
            matched.push((id, row, keys));
        }
    }

    if !query.orders().is_empty() {
        sort_rows(&mut matched, query.orders());
    }

    let mut rows: Vec<(usize, Row)> = matched.into_iter().map(|(id, row, _)| (id, row)).collect();
    if let Some(limit) = query.limit_value() {
        rows.truncate(limit);
    }

    Ok(rows)
}

// Order keys of the first combination of joined rows that satisfies every
// join condition and the WHERE clauses, or `None` when no combination does.
fn first_match<'a>(
    ctx: &RowContext<'a>,
    query: &Query<'_>,
    joined: &'a [JoinedTable<'a>],
    depth: usize,
) -> Result<Option<Vec<Value>>> {
    let Some((name, schema, rows)) = joined.get(depth) else {
        if !evaluate_clauses(query.wheres(), ctx)? {
            return Ok(None);
        }
        let keys = query
            .orders()
            .iter()
            .map(|(column, _)| ctx.resolve(column).cloned())
            .collect::<Result<_>>()?;
        return Ok(Some(keys));
    };

    let join = &query.joins()[depth];
    for row in rows {
        let next = ctx.with(name, schema, row);
        if join_holds(join, &next)?
            && let Some(keys) = first_match(&next, query, joined, depth + 1)?
        {
            return Ok(Some(keys));
        }
    }
    Ok(None)
}

fn join_holds(join: &Join, ctx: &RowContext<'_>) -> Result<bool> {
    let left = ctx.resolve(&join.left)?;
    let right = ctx.resolve(&join.right)?;
    if left.is_null() || right.is_null() {
        return Ok(false);
    }
    Ok(join.op.holds(left.compare(right)?))
}

// Stable: ties keep storage order.
fn sort_rows(rows: &mut [(usize, Row, Vec<Value>)], orders: &[(String, Direction)]) {
    rows.sort_by(|(_, _, a), (_, _, b)| {
        for ((left, right), (_, direction)) in a.iter().zip(b).zip(orders) {
            let ordering = left.compare(right).unwrap_or(Ordering::Equal);
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

pub(crate) fn update_rows(
    storage: &mut InMemoryStorage,
    query: &Query<'_>,
    assignments: Vec<(&str, Value)>,
) -> Result<usize> {
    let record_type = query.record_type();
    let date_format = query.db().config().date_format.clone();
    let targets = matching_rows(storage, query)?;

    let table = storage.get_table_mut(record_type.table())?;
    let schema = table.schema().clone();

    let mut resolved = Vec::with_capacity(assignments.len() + 1);
    for (column, value) in assignments {
        let (qualifier, name) = split_qualified(column);
        if let Some(qualifier) = qualifier
            && qualifier != schema.name()
        {
            return Err(DbError::UnsupportedOperation(format!(
                "Cannot update column '{}' of joined table '{}'",
                name, qualifier
            )));
        }
        let idx = schema
            .schema()
            .find_column_index(name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), schema.name().to_string()))?;
        let value = schema.schema().columns()[idx].data_type.cast_value(&value, &date_format)?;
        resolved.push((idx, value));
    }

    if record_type.uses_timestamps()
        && let Some(idx) = schema.schema().find_column_index(UPDATED_AT)
        && !resolved.iter().any(|(i, _)| *i == idx)
    {
        resolved.push((idx, Value::Timestamp(query.db().now())));
    }

    let updates = targets
        .into_iter()
        .map(|(id, mut row)| {
            for (idx, value) in &resolved {
                row[*idx] = value.clone();
            }
            (id, row)
        })
        .collect();
    table.update_batch(updates)
}

pub(crate) fn delete_rows(storage: &mut InMemoryStorage, query: &Query<'_>) -> Result<usize> {
    let targets = matching_rows(storage, query)?;
    let table = storage.get_table_mut(query.record_type().table())?;
    Ok(targets.into_iter().filter(|(id, _)| table.delete(*id)).count())
}
