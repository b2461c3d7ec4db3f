use crate::context::Context;
use crate::error::BoxError;
use futures::future::BoxFuture;
use std::sync::Arc;

pub type HandlerResult = Result<(), BoxError>;

/// Terminal action of a route.
///
/// Implemented for every `Fn(&mut Context<B>) -> BoxFuture<'_, HandlerResult>`:
///
/// ```rust
/// use bonfire::Bonfire;
///
/// let mut app = Bonfire::new(());
/// app.get("/", |c| Box::pin(async move { c.text("hello") })).unwrap();
/// ```
pub trait Handler<B>: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context<B>) -> BoxFuture<'a, HandlerResult>;
}

impl<B, F> Handler<B> for F
where
    F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context<B>) -> BoxFuture<'a, HandlerResult> {
        (self)(ctx)
    }
}

pub type BoxedHandler<B> = Arc<dyn Handler<B>>;

/// Boxes a handler closure.
pub fn from_fn<B, F>(handler: F) -> BoxedHandler<B>
where
    F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Receives whatever error escaped the middleware chain.
pub(crate) type ErrorHandler<B> = Arc<
    dyn for<'a> Fn(&'a mut Context<B>, BoxError) -> BoxFuture<'a, HandlerResult> + Send + Sync,
>;

/// Replies 500 with the error message as a plain-text body.
pub(crate) fn default_error_handler<B: Send + Sync + 'static>() -> ErrorHandler<B> {
    Arc::new(report_error::<B>)
}

fn report_error<B: Send + Sync>(ctx: &mut Context<B>, err: BoxError) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move { ctx.status(500).text(err.to_string()) })
}
