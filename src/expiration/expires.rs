use std::sync::Arc;

use tracing::debug;

use super::scope::ExpirationScope;
use crate::core::{DbError, Result, Value, parse_timestamp};
use crate::facade::Database;
use crate::model::{Behavior, Hook, HookDecision, ModelEvent, Record, RecordType, RecordTypeBuilder};

/// Default name of the expired-at column.
pub const EXPIRED_AT: &str = "expired_at";

/// Record type constant that overrides [`EXPIRED_AT`].
pub const EXPIRED_AT_CONSTANT: &str = "EXPIRED_AT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpirationEvent {
    Expiring,
    Expired,
    Unexpiring,
    Unexpired,
}

impl ExpirationEvent {
    pub const ALL: [ExpirationEvent; 4] = [
        ExpirationEvent::Expiring,
        ExpirationEvent::Expired,
        ExpirationEvent::Unexpiring,
        ExpirationEvent::Unexpired,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Expiring => "expiring",
            Self::Expired => "expired",
            Self::Unexpiring => "unexpiring",
            Self::Unexpired => "unexpired",
        }
    }
}

impl From<ExpirationEvent> for ModelEvent {
    fn from(event: ExpirationEvent) -> Self {
        ModelEvent::Observable(event.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationState {
    /// expired-at is NULL or in the future
    Active,
    /// expired-at is now or in the past
    Expired,
}

/// Behavior that makes a record type expirable.
///
/// Registers [`ExpirationScope`] as a global scope and, once the type has
/// booted, declares the four expiration events observable.
#[derive(Debug, Default, Clone, Copy)]
pub struct Expires;

impl Expires {
    pub const NAME: &'static str = "expires";
}

impl Behavior for Expires {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_type_initialized(&self, builder: &mut RecordTypeBuilder) -> Result<()> {
        builder.add_global_scope(Arc::new(ExpirationScope));
        Ok(())
    }

    fn on_booted(&self, builder: &mut RecordTypeBuilder) -> Result<()> {
        builder.add_observable_events(ExpirationEvent::ALL.map(ModelEvent::from));
        Ok(())
    }
}

pub trait ExpirationColumns {
    /// `EXPIRED_AT` constant of the type when set, `expired_at` otherwise.
    fn expired_at_column(&self) -> &str;

    fn qualified_expired_at_column(&self) -> String;
}

impl ExpirationColumns for RecordType {
    fn expired_at_column(&self) -> &str {
        self.constant(EXPIRED_AT_CONSTANT).unwrap_or(EXPIRED_AT)
    }

    fn qualified_expired_at_column(&self) -> String {
        self.qualify_column(self.expired_at_column())
    }
}

impl ExpirationColumns for Record {
    fn expired_at_column(&self) -> &str {
        self.record_type().expired_at_column()
    }

    fn qualified_expired_at_column(&self) -> String {
        self.record_type().qualified_expired_at_column()
    }
}

/// Single-record expiration with cancellable hooks.
pub trait HasExpiration: ExpirationColumns {
    /// Fire `expiring`; unless vetoed, stamp the column with the current
    /// time, save, then fire `expired`. Returns the save result, or
    /// `Ok(false)` without touching anything when vetoed.
    fn expire(&mut self, db: &Database) -> Result<bool>;

    /// Same as [`expire`](Self::expire) with `unexpiring`/`unexpired`,
    /// clearing the column.
    fn unexpire(&mut self, db: &Database) -> Result<bool>;

    fn expiration_state(&self, db: &Database) -> Result<ExpirationState>;

    fn is_expired(&self, db: &Database) -> Result<bool> {
        Ok(self.expiration_state(db)? == ExpirationState::Expired)
    }
}

impl HasExpiration for Record {
    fn expire(&mut self, db: &Database) -> Result<bool> {
        let now = db.fresh_timestamp_string();
        transition(self, db, ExpirationEvent::Expiring, ExpirationEvent::Expired, Value::Text(now))
    }

    fn unexpire(&mut self, db: &Database) -> Result<bool> {
        transition(self, db, ExpirationEvent::Unexpiring, ExpirationEvent::Unexpired, Value::Null)
    }

    fn expiration_state(&self, db: &Database) -> Result<ExpirationState> {
        let column = self.expired_at_column();
        let expired_at = match self.get(column) {
            None => {
                return Err(DbError::ColumnNotFound(
                    column.to_string(),
                    self.record_type().table().to_string(),
                ));
            }
            Some(Value::Null) => return Ok(ExpirationState::Active),
            Some(Value::Timestamp(ts)) => *ts,
            Some(Value::Text(text)) => parse_timestamp(text, &db.config().date_format)?,
            Some(other) => {
                return Err(DbError::TypeMismatch(format!(
                    "Column '{}' holds {}, expected TIMESTAMP",
                    column,
                    other.type_name()
                )));
            }
        };

        if expired_at <= db.now() {
            Ok(ExpirationState::Expired)
        } else {
            Ok(ExpirationState::Active)
        }
    }
}

// The after-event fires whenever save returns, successful or not; a save
// error skips it and propagates.
fn transition(
    record: &mut Record,
    db: &Database,
    before: ExpirationEvent,
    after: ExpirationEvent,
    value: Value,
) -> Result<bool> {
    let record_type = record.record_type().clone();
    if !record_type.has_behavior(Expires::NAME) {
        return Err(DbError::UnsupportedOperation(format!(
            "Record type '{}' is not expirable",
            record_type.name()
        )));
    }

    if !record_type.events().until(before.into(), record)? {
        debug!(record_type = record_type.name(), key = %record.key(), event = before.name(), "transition cancelled");
        return Ok(false);
    }

    // Cast as storage would, so the attribute has its stored type even if
    // the save is vetoed.
    let column = record_type.expired_at_column();
    let data_type = record_type
        .schema()
        .schema()
        .get_column(column)
        .map(|c| c.data_type)
        .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), record_type.table().to_string()))?;
    record.set(column, data_type.cast_value(&value, &db.config().date_format)?)?;
    let saved = record.save(db)?;
    record_type.events().dispatch(after.into(), record)?;

    Ok(saved)
}

/// Named handler registering all four expiration listeners at once.
pub trait ExpirationObserver: Send + Sync {
    fn expiring(&self, _record: &Record) -> HookDecision {
        HookDecision::Proceed
    }

    fn expired(&self, _record: &Record) {}

    fn unexpiring(&self, _record: &Record) -> HookDecision {
        HookDecision::Proceed
    }

    fn unexpired(&self, _record: &Record) {}
}

/// Listener registration for the expiration events. Listeners accumulate
/// in registration order.
pub trait ExpirationHooks {
    fn on_expiring<F>(&self, guard: F) -> Result<()>
    where
        F: Fn(&Record) -> HookDecision + Send + Sync + 'static;

    fn on_expired<F>(&self, notify: F) -> Result<()>
    where
        F: Fn(&Record) + Send + Sync + 'static;

    fn on_unexpiring<F>(&self, guard: F) -> Result<()>
    where
        F: Fn(&Record) -> HookDecision + Send + Sync + 'static;

    fn on_unexpired<F>(&self, notify: F) -> Result<()>
    where
        F: Fn(&Record) + Send + Sync + 'static;

    fn observe_expiration(&self, observer: Arc<dyn ExpirationObserver>) -> Result<()>;
}

impl ExpirationHooks for RecordType {
    fn on_expiring<F>(&self, guard: F) -> Result<()>
    where
        F: Fn(&Record) -> HookDecision + Send + Sync + 'static,
    {
        self.listen(ExpirationEvent::Expiring.into(), Hook::guard(guard))
    }

    fn on_expired<F>(&self, notify: F) -> Result<()>
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.listen(ExpirationEvent::Expired.into(), Hook::notify(notify))
    }

    fn on_unexpiring<F>(&self, guard: F) -> Result<()>
    where
        F: Fn(&Record) -> HookDecision + Send + Sync + 'static,
    {
        self.listen(ExpirationEvent::Unexpiring.into(), Hook::guard(guard))
    }

    fn on_unexpired<F>(&self, notify: F) -> Result<()>
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.listen(ExpirationEvent::Unexpired.into(), Hook::notify(notify))
    }

    fn observe_expiration(&self, observer: Arc<dyn ExpirationObserver>) -> Result<()> {
        let o = observer.clone();
        self.on_expiring(move |r| o.expiring(r))?;
        let o = observer.clone();
        self.on_expired(move |r| o.expired(r))?;
        let o = observer.clone();
        self.on_unexpiring(move |r| o.unexpiring(r))?;
        self.on_unexpired(move |r| observer.unexpired(r))
    }
}
