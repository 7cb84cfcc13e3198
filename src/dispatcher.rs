//! Webhook endpoint: validation, classification and event dispatch

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State as AxumState},
    http::{HeaderMap, StatusCode},
    routing,
};
use std::sync::Arc;
use tracing::{self, debug, error, info, warn};
use uuid::Uuid;

use crate::action;
use crate::config::HookConfig;
use crate::error::{BoxError, ConfigError, DispatchError, HookError};
use crate::events::{ERROR_EVENT, Event, EventBus, HOOK_EVENT, Listener, listener};
use crate::middleware::{InboundRequest, SharedMiddleware, run_chain};
use crate::payload::{self, WebhookPayload, classify, is_ping};
use crate::signature::{self, SIGNATURE_HEADER};

pub const DELIVERY_HEADER: &str = "x-github-delivery";
pub const ACCEPTED_BODY: &str = "Accepted\n";

struct HookInner {
    github_ref: String,
    secret: Option<String>,
    body_limit: usize,
    middleware: Vec<SharedMiddleware>,
    bus: Arc<EventBus>,
}

/// A webhook endpoint and the event bus its deliveries are published on.
///
/// Cloning is cheap; clones share the same bus.
#[derive(Clone)]
pub struct GitHook {
    inner: Arc<HookInner>,
}

/// Outcome of a request that did not fail
enum Outcome {
    Ping,
    Accepted,
}

impl GitHook {
    /// Validates the configuration and binds the action to the watched ref.
    pub fn new(config: HookConfig) -> Result<Self, ConfigError> {
        let body_limit = config.validate()?;
        let bus = Arc::new(EventBus::new());
        action::bind(&bus, &config.github_ref, config.action, config.working_dir);

        info!(
            "Watching ref '{}' (signature check {}, body limit {} bytes)",
            config.github_ref,
            if config.secret.is_some() { "on" } else { "off" },
            body_limit
        );

        Ok(Self {
            inner: Arc::new(HookInner {
                github_ref: config.github_ref,
                secret: config.secret,
                body_limit,
                middleware: config.middleware,
                bus,
            }),
        })
    }

    pub fn watched_ref(&self) -> &str {
        &self.inner.github_ref
    }

    pub fn verifies_signatures(&self) -> bool {
        self.inner.secret.is_some()
    }

    /// Registers a listener for `name` (`push`, `hook`, `spawn`, `error`, a ref, ...).
    ///
    /// Ref events share the namespace with the built-in names. A delivery whose
    /// ref is `"error"` or `"spawn"` reaches those listeners as an
    /// [`Event::Payload`], so they must not assume `event.error()` or
    /// `event.process()` is set.
    pub fn on<F>(&self, name: impl Into<String>, f: F) -> &Self
    where
        F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.subscribe(name, listener(f))
    }

    pub fn subscribe(&self, name: impl Into<String>, listener: Listener) -> &Self {
        self.inner.bus.subscribe(name, listener);
        self
    }

    /// Publishes `event` on this hook's bus.
    pub fn emit(&self, name: &str, event: &Event) -> Result<(), BoxError> {
        self.inner.bus.publish(name, event)
    }

    /// `POST /` guarded by the configured body limit (413 above it).
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", routing::post(handle_webhook))
            .layer(DefaultBodyLimit::max(self.inner.body_limit))
            .with_state(self.clone())
    }

    /// Runs one delivery through the pipeline and returns the response to send.
    pub fn dispatch(&self, headers: &HeaderMap, body: &[u8]) -> (StatusCode, String) {
        let delivery = headers
            .get(DELIVERY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let span = tracing::info_span!("webhook", delivery = %delivery);
        let _enter = span.enter();

        match self.process(headers, body) {
            Ok(Outcome::Ping) => {
                info!("Ping event received");
                reason(StatusCode::OK)
            }
            Ok(Outcome::Accepted) => (StatusCode::ACCEPTED, ACCEPTED_BODY.to_string()),
            Err(err) => self.fail(err),
        }
    }

    fn process(&self, headers: &HeaderMap, body: &[u8]) -> Result<Outcome, HookError> {
        run_chain(&self.inner.middleware, &InboundRequest { headers, body })?;

        // the raw bytes are signed, never a re-encoded payload
        if let Some(secret) = &self.inner.secret {
            // a header that is not visible ASCII can never match
            let provided = headers
                .get(SIGNATURE_HEADER)
                .map(|v| v.to_str().unwrap_or_default());
            signature::validate(secret, body, provided)?;
        }

        if is_ping(headers) {
            return Ok(Outcome::Ping);
        }

        let payload = Arc::new(WebhookPayload::decode(payload::content_type(headers), body)?);
        let (category, git_ref) = classify(&payload)?;
        info!("{} event for ref '{}'", category, git_ref);

        let event = Event::Payload(payload.clone());
        for name in [category.as_str(), HOOK_EVENT, git_ref] {
            self.inner
                .bus
                .publish(name, &event)
                .map_err(|e| DispatchError::new(name, e))?;
        }

        if git_ref != self.inner.github_ref {
            debug!(
                "Ref '{}' is not the watched ref '{}'",
                git_ref, self.inner.github_ref
            );
        }
        Ok(Outcome::Accepted)
    }

    /// Reports a failed request on the `error` event and builds its response.
    fn fail(&self, err: HookError) -> (StatusCode, String) {
        let status = err.status();
        let body = match &err {
            HookError::Dispatch(e) => e.message.clone(),
            HookError::Rejected { message, .. } => message.clone(),
            _ => reason(status).1,
        };

        match &err {
            HookError::Dispatch(e) => error!("Listener for '{}' failed: {}", e.event, e),
            _ => warn!("Rejected webhook ({}): {}", status.as_u16(), err),
        }

        if self.inner.bus.listener_count(ERROR_EVENT) == 0 {
            error!("Unhandled webhook error: {}", err);
        } else if let Err(e) = self.inner.bus.publish(ERROR_EVENT, &Event::Error(err)) {
            error!("Error listener failed: {}", e);
        }

        (status, body)
    }
}

impl std::fmt::Debug for GitHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHook")
            .field("github_ref", &self.inner.github_ref)
            .field("verifies_signatures", &self.verifies_signatures())
            .field("body_limit", &self.inner.body_limit)
            .field("bus", &self.inner.bus)
            .finish()
    }
}

fn reason(status: StatusCode) -> (StatusCode, String) {
    (
        status,
        status.canonical_reason().unwrap_or_default().to_string(),
    )
}

/// Handles the webhook POST request.
pub async fn handle_webhook(
    AxumState(hook): AxumState<GitHook>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    hook.dispatch(&headers, &body)
}
