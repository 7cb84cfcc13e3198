//! In-process publish/subscribe surface owned by a `GitHook`

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{self, debug};

use crate::action::ProcessHandle;
use crate::error::{BoxError, HookError};
use crate::payload::WebhookPayload;

pub const HOOK_EVENT: &str = "hook";
pub const SPAWN_EVENT: &str = "spawn";
pub const ERROR_EVENT: &str = "error";

/// Value delivered to listeners
#[derive(Debug)]
pub enum Event {
    /// Category, `hook` and ref events. The same `Arc` is shared by all three.
    Payload(Arc<WebhookPayload>),
    /// A shell action was started
    Spawn(ProcessHandle),
    /// A request failed
    Error(HookError),
}

impl Event {
    pub fn payload(&self) -> Option<&Arc<WebhookPayload>> {
        match self {
            Event::Payload(p) => Some(p),
            _ => None,
        }
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        match self {
            Event::Spawn(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&HookError> {
        match self {
            Event::Error(err) => Some(err),
            _ => None,
        }
    }
}

pub type Listener = Arc<dyn Fn(&Event) -> Result<(), BoxError> + Send + Sync>;

/// Wraps a closure into a `Listener`
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Named listener registry.
///
/// Listeners run synchronously on the publishing thread in subscription
/// order. The first listener error aborts the publish and is returned.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, name: impl Into<String>, listener: Listener) {
        let name = name.into();
        let mut registry = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.entry(name).or_default().push(listener);
    }

    pub fn publish(&self, name: &str, event: &Event) -> Result<(), BoxError> {
        // snapshot so listeners may subscribe or publish re-entrantly
        let snapshot = self.snapshot(name);
        debug!("Publishing '{}' to {} listener(s)", name, snapshot.len());
        for listener in snapshot {
            listener(event)?;
        }
        Ok(())
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.snapshot(name).len()
    }

    fn snapshot(&self, name: &str) -> Vec<Listener> {
        let registry = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.get(name).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = match self.listeners.read() {
            Ok(guard) => guard.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        f.debug_struct("EventBus").field("events", &names).finish()
    }
}
