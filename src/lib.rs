pub mod action;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod middleware;
pub mod payload;
pub mod signature;

pub use action::{Action, ProcessHandle};
pub use config::{ALL_HOOKS_REF, DEFAULT_JSON_LIMIT, HookConfig};
pub use dispatcher::GitHook;
pub use error::{ConfigError, HookError, Result};
pub use events::{ERROR_EVENT, Event, EventBus, HOOK_EVENT, SPAWN_EVENT};
pub use payload::{EventCategory, WebhookPayload};
