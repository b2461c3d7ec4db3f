mod timeout;

pub use timeout::Timeout;

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler, HandlerResult};
use futures::future::BoxFuture;
use std::sync::Arc;

/// The rest of the chain, handed to every middleware.
///
/// Not calling [`Next::handle`] short-circuits everything behind it.
pub struct Next<B> {
    handler: BoxedHandler<B>,
}

impl<B> Clone for Next<B> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<B: 'static> Next<B> {
    pub(crate) fn new(handler: BoxedHandler<B>) -> Self {
        Self { handler }
    }

    pub fn handle<'a>(&'a self, ctx: &'a mut Context<B>) -> BoxFuture<'a, HandlerResult> {
        self.handler.call(ctx)
    }
}

pub trait Middleware<B>: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context<B>, next: Next<B>) -> BoxFuture<'a, HandlerResult>;
}

impl<B, F> Middleware<B> for F
where
    F: for<'a> Fn(&'a mut Context<B>, Next<B>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context<B>, next: Next<B>) -> BoxFuture<'a, HandlerResult> {
        (self)(ctx, next)
    }
}

pub type BoxedMiddleware<B> = Arc<dyn Middleware<B>>;

/// Boxes a middleware closure, e.g. to attach the same one at several paths.
pub fn from_fn<B, F>(middleware: F) -> BoxedMiddleware<B>
where
    F: for<'a> Fn(&'a mut Context<B>, Next<B>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(middleware)
}

struct Chain<B> {
    middleware: BoxedMiddleware<B>,
    next: BoxedHandler<B>,
}

impl<B: 'static> Handler<B> for Chain<B> {
    fn call<'a>(&'a self, ctx: &'a mut Context<B>) -> BoxFuture<'a, HandlerResult> {
        self.middleware.call(ctx, Next::new(Arc::clone(&self.next)))
    }
}

/// Wraps `handler` in `middlewares` so the first one runs outermost.
pub(crate) fn compose<B: 'static>(
    handler: BoxedHandler<B>,
    middlewares: &[BoxedMiddleware<B>],
) -> BoxedHandler<B> {
    middlewares.iter().rev().fold(handler, |next, middleware| {
        let chained: BoxedHandler<B> = Arc::new(Chain {
            middleware: Arc::clone(middleware),
            next,
        });
        chained
    })
}
