use std::collections::BTreeMap;

use super::Query;
use crate::core::Result;
use crate::model::RecordType;

/// A predicate injector applied to every query of the record types it is
/// registered on.
pub trait Scope: Send + Sync {
    /// Identity used to register, replace and remove the scope.
    fn name(&self) -> &'static str;

    /// Add the scope's predicates. Runs once per query, right before execution.
    fn apply(&self, query: &mut Query<'_>, record_type: &RecordType) -> Result<()>;

    /// Register the query operations this scope provides.
    fn extend(&self, _extensions: &mut Extensions) {}
}

/// Named query operations available on one query, each owned by a scope.
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    entries: BTreeMap<&'static str, &'static str>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `operation` as provided by `scope`. Re-registering replaces.
    pub fn register(&mut self, operation: &'static str, scope: &'static str) {
        self.entries.insert(operation, scope);
    }

    /// The scope that provides `operation`, if any.
    pub fn provider(&self, operation: &str) -> Option<&'static str> {
        self.entries.get(operation).copied()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.entries.contains_key(operation)
    }

    pub fn operations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
