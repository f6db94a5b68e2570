//! Observer registration and fan-out.

use crate::protocol::InboundEvent;
use crate::state::ConnectionState;

/// Callback interface for connection-state transitions and decoded events.
///
/// The client owns the boxed observer and never holds a reference back into
/// the subscriber's state; this trait is the only invocation channel.
pub trait TelemetryObserver: Send {
    fn on_connection_state(&mut self, state: ConnectionState) {
        let _ = state;
    }

    fn on_event(&mut self, event: &InboundEvent) {
        let _ = event;
    }
}

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<(SubscriptionId, Box<dyn TelemetryObserver>)>,
}

impl Registry {
    pub(crate) fn insert(&mut self, id: SubscriptionId, observer: Box<dyn TelemetryObserver>) {
        self.entries.push((id, observer));
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn notify_state(&mut self, state: ConnectionState) {
        for (_, observer) in &mut self.entries {
            observer.on_connection_state(state);
        }
    }

    pub(crate) fn notify_event(&mut self, event: &InboundEvent) {
        for (_, observer) in &mut self.entries {
            observer.on_event(event);
        }
    }
}
