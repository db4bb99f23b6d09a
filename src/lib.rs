// ============================================================================
// expirable: soft expiration for in-memory records
// ============================================================================

pub mod clock;
pub mod config;
pub mod core;
pub mod expiration;
pub mod facade;
pub mod model;
pub mod prelude;
pub mod query;
pub mod storage;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DatabaseConfig, RecordTypeConfig};
pub use core::{Column, DataType, DbError, Result, Value};
pub use expiration::{
    ExpirationColumns, ExpirationEvent, ExpirationHooks, ExpirationObserver, ExpirationQueryExt,
    ExpirationScope, ExpirationState, Expires, HasExpiration,
};
pub use facade::Database;
pub use model::{Behavior, Hook, HookDecision, ModelEvent, Record, RecordType, RecordTypeBuilder};
pub use query::{CompareOp, Direction, Query, Scope};
