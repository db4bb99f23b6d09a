use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::Record;
use crate::core::Result;

/// Lifecycle points a record type can be observed at.
///
/// The save cycle events are always observable. Behaviors add their own
/// through [`ModelEvent::Observable`] and declare them while the type boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    Saving,
    Saved,
    Creating,
    Created,
    Updating,
    Updated,
    Observable(&'static str),
}

impl ModelEvent {
    pub const BUILTIN: [ModelEvent; 6] = [
        ModelEvent::Saving,
        ModelEvent::Saved,
        ModelEvent::Creating,
        ModelEvent::Created,
        ModelEvent::Updating,
        ModelEvent::Updated,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::Updated => "updated",
            Self::Observable(name) => *name,
        }
    }
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a guard hook decided about the pending transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    Proceed,
    Veto,
}

impl From<bool> for HookDecision {
    fn from(proceed: bool) -> Self {
        if proceed { Self::Proceed } else { Self::Veto }
    }
}

pub type GuardFn = Arc<dyn Fn(&Record) -> HookDecision + Send + Sync>;
pub type NotifyFn = Arc<dyn Fn(&Record) + Send + Sync>;

/// A registered listener.
///
/// Guards run before a transition and may veto it. Notifications only
/// observe; they run after the fact and cannot change the outcome.
#[derive(Clone)]
pub enum Hook {
    Guard(GuardFn),
    Notify(NotifyFn),
}

impl Hook {
    pub fn guard<F>(f: F) -> Self
    where
        F: Fn(&Record) -> HookDecision + Send + Sync + 'static,
    {
        Self::Guard(Arc::new(f))
    }

    pub fn notify<F>(f: F) -> Self
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        Self::Notify(Arc::new(f))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guard(_) => f.write_str("Hook::Guard"),
            Self::Notify(_) => f.write_str("Hook::Notify"),
        }
    }
}

/// Per record type listener table. Listeners run in registration order.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    listeners: RwLock<HashMap<ModelEvent, Vec<Hook>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, event: ModelEvent, hook: Hook) -> Result<()> {
        let mut listeners = self.listeners.write()?;
        listeners.entry(event).or_default().push(hook);
        Ok(())
    }

    /// Fire a halting event. Returns `false` as soon as a guard vetoes;
    /// listeners after the vetoing one are not called.
    pub fn until(&self, event: ModelEvent, record: &Record) -> Result<bool> {
        for hook in self.snapshot(event)? {
            match hook {
                Hook::Guard(guard) => {
                    if guard(record) == HookDecision::Veto {
                        debug!(event = event.name(), record_type = record.record_type().name(), "listener vetoed transition");
                        return Ok(false);
                    }
                }
                Hook::Notify(notify) => notify(record),
            }
        }
        Ok(true)
    }

    /// Fire a non-halting event. Guard decisions are ignored.
    pub fn dispatch(&self, event: ModelEvent, record: &Record) -> Result<()> {
        for hook in self.snapshot(event)? {
            match hook {
                Hook::Guard(guard) => {
                    guard(record);
                }
                Hook::Notify(notify) => notify(record),
            }
        }
        Ok(())
    }

    pub fn listener_count(&self, event: ModelEvent) -> Result<usize> {
        Ok(self.listeners.read()?.get(&event).map_or(0, Vec::len))
    }

    /// Remove every listener of one event.
    pub fn forget(&self, event: ModelEvent) -> Result<()> {
        self.listeners.write()?.remove(&event);
        Ok(())
    }

    /// Remove every listener of every event.
    pub fn flush(&self) -> Result<()> {
        self.listeners.write()?.clear();
        Ok(())
    }

    // Listeners are cloned out so a hook may register further listeners.
    fn snapshot(&self, event: ModelEvent) -> Result<Vec<Hook>> {
        Ok(self.listeners.read()?.get(&event).cloned().unwrap_or_default())
    }
}
