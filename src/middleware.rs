//! Operator supplied request checks, run in order before signature validation

use axum::http::{HeaderMap, StatusCode};
use std::sync::Arc;

use crate::error::HookError;

/// Raw view of an inbound delivery handed to each middleware
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

pub trait Middleware: Send + Sync {
    /// Returning an error stops the request and answers with the error's status.
    fn inspect(&self, request: &InboundRequest<'_>) -> Result<(), HookError>;
}

impl<F> Middleware for F
where
    F: Fn(&InboundRequest<'_>) -> Result<(), HookError> + Send + Sync,
{
    fn inspect(&self, request: &InboundRequest<'_>) -> Result<(), HookError> {
        self(request)
    }
}

pub type SharedMiddleware = Arc<dyn Middleware>;

/// Builds the error a middleware returns to turn a request away
pub fn reject(status: StatusCode, message: impl Into<String>) -> HookError {
    HookError::Rejected {
        status,
        message: message.into(),
    }
}

pub fn run_chain(chain: &[SharedMiddleware], request: &InboundRequest<'_>) -> Result<(), HookError> {
    chain.iter().try_for_each(|m| m.inspect(request))
}
