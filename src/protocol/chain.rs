use super::{AuthError, AuthResponse, RequestContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Result of one middleware step.
#[derive(Debug)]
pub enum Flow {
    Continue,
    Respond(AuthResponse),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    /// Faults abort the chain; protocol outcomes are returned as
    /// [`Flow::Respond`].
    async fn handle(&self, ctx: &mut RequestContext) -> Result<Flow, AuthError>;
}

/// Ordered list of middlewares run against one request context.
#[derive(Clone, Default)]
pub struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run every middleware in order until one responds.
    ///
    /// # Errors
    /// Returns the first fault raised by a middleware.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, AuthError> {
        for middleware in &self.middlewares {
            trace!("middleware {}", middleware.name());
            if let Flow::Respond(response) = middleware.handle(ctx).await? {
                return Ok(Flow::Respond(response));
            }
        }
        Ok(Flow::Continue)
    }
}
