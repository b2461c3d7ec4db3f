use crate::context::Context;
use crate::error::Error;
use crate::handler::HandlerResult;
use crate::middleware::{Middleware, Next};
use futures::future::BoxFuture;
use std::time::Duration;

/// Fails the request with [`Error::RequestTimeout`] when the rest of the chain
/// takes longer than `limit`.
///
/// The unfinished chain is dropped at the deadline, so anything it wrote to the
/// response so far is left in place for the error handler to overwrite.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    limit: Duration,
}

impl Timeout {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

impl<B: Send + Sync + 'static> Middleware<B> for Timeout {
    fn call<'a>(&'a self, ctx: &'a mut Context<B>, next: Next<B>) -> BoxFuture<'a, HandlerResult> {
        let limit = self.limit;
        Box::pin(async move {
            match tokio::time::timeout(limit, next.handle(ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(?limit, "request timed out");
                    Err(Error::RequestTimeout.into())
                }
            }
        })
    }
}
