pub mod events;
pub mod record;
pub mod record_type;

pub use events::{EventDispatcher, Hook, HookDecision, ModelEvent};
pub use record::Record;
pub use record_type::{Behavior, CREATED_AT, RecordType, RecordTypeBuilder, UPDATED_AT};
