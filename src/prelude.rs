//! Everything needed to declare expirable record types and query them.
//!
//! ```
//! use expirable::prelude::*;
//! ```

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{DatabaseConfig, RecordTypeConfig};
pub use crate::core::{Column, DataType, DbError, Result, Value};
pub use crate::expiration::{
    ExpirationColumns, ExpirationEvent, ExpirationHooks, ExpirationObserver, ExpirationQueryExt,
    ExpirationState, Expires, HasExpiration,
};
pub use crate::facade::Database;
pub use crate::model::{Hook, HookDecision, ModelEvent, Record, RecordType, RecordTypeBuilder};
pub use crate::query::{CompareOp, Direction, Query};
