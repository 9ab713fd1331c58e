use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::relay::protocol::{
    ErrorEvent, NewMessage, ParticipantList, ServerEvent, SessionEnded, TypingUpdate, UserJoined, UserLeft,
};

use super::ClientState;

/// Callbacks for server events. Every method is optional.
pub trait SessionEventHandler: Send + Sync {
    fn on_user_joined(&self, _event: &UserJoined) {}
    fn on_user_left(&self, _event: &UserLeft) {}
    fn on_new_message(&self, _event: &NewMessage) {}
    fn on_typing(&self, _event: &TypingUpdate) {}
    fn on_session_ended(&self, _event: &SessionEnded) {}
    fn on_error(&self, _event: &ErrorEvent) {}
    fn on_participants(&self, _event: &ParticipantList) {}
    fn on_state_change(&self, _state: ClientState) {}
}

type HandlerEntry = (u64, Arc<dyn SessionEventHandler>);

#[derive(Default)]
pub(crate) struct HandlerSet {
    next_id: AtomicU64,
    handlers: Mutex<Vec<HandlerEntry>>,
}

impl HandlerSet {
    pub(crate) fn subscribe(self: &Arc<Self>, handler: Arc<dyn SessionEventHandler>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, handler));
        Subscription {
            id,
            set: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(entry_id, _)| *entry_id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<HandlerEntry>> {
        self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Handlers are called outside the lock so they may unsubscribe themselves
    fn snapshot(&self) -> Vec<Arc<dyn SessionEventHandler>> {
        self.lock().iter().map(|(_, handler)| handler.clone()).collect()
    }

    pub(crate) fn dispatch(&self, event: &ServerEvent) {
        for handler in self.snapshot() {
            match event {
                ServerEvent::UserJoined(e) => handler.on_user_joined(e),
                ServerEvent::UserLeft(e) => handler.on_user_left(e),
                ServerEvent::NewMessage(e) => handler.on_new_message(e),
                ServerEvent::Typing(e) => handler.on_typing(e),
                ServerEvent::SessionEnded(e) => handler.on_session_ended(e),
                ServerEvent::Error(e) => handler.on_error(e),
                ServerEvent::Participants(e) => handler.on_participants(e),
            }
        }
    }

    pub(crate) fn dispatch_state(&self, state: ClientState) {
        for handler in self.snapshot() {
            handler.on_state_change(state);
        }
    }
}

/// Detaches its handler on [`Subscription::unsubscribe`] or drop
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    id: u64,
    set: Weak<HandlerSet>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}
