//! Soft expiration: records whose expired-at timestamp has passed are hidden
//! from queries until asked for explicitly.

pub mod expires;
pub mod scope;

pub use expires::{
    EXPIRED_AT, EXPIRED_AT_CONSTANT, ExpirationColumns, ExpirationEvent, ExpirationHooks,
    ExpirationObserver, ExpirationState, Expires, HasExpiration,
};
pub use scope::{ExpirationQueryExt, ExpirationScope};
