pub mod builder;
mod executor;
pub mod predicate;
pub mod scope;

pub use builder::{Direction, Join, Query};
pub use predicate::{Boolean, Clause, CompareOp, Predicate};
pub use scope::{Extensions, Scope};
