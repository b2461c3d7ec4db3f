//! `Bonfire` is the entry point: register routes, middlewares and background
//! tasks, then `fire` it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use bonfire::Bonfire;
//!
//! #[tokio::main]
//! async fn main() -> bonfire::Result<()> {
//!     let mut app = Bonfire::new(());
//!     app.get("/hello", |c| Box::pin(async move { c.text("hello") }))?;
//!     app.fire(":3000").await
//! }
//! ```

use crate::blow::{Blow, BlowTask, TaskContext};
use crate::config::Config;
use crate::context::Context;
use crate::error::{BoxError, Result};
use crate::handler::{self, ErrorHandler, Handler, HandlerResult};
use crate::http::request::decode_segment;
use crate::http::{Method, Request, Response};
use crate::middleware::{self, compose, BoxedMiddleware, Middleware, Next};
use crate::pool::ContextPool;
use crate::router::{Router, TrieRouter};
use crate::server::{Lifecycle, TlsConfig};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request needs, shared with connection tasks while serving.
pub(crate) struct Core<B> {
    pub(crate) env: Arc<B>,
    pub(crate) router: Box<dyn Router<B>>,
    pub(crate) pool: ContextPool<B>,
    pub(crate) on_error: ErrorHandler<B>,
    pub(crate) blow: Blow<B>,
    pub(crate) config: Config,
    pub(crate) tls: Option<TlsConfig>,
}

/// An HTTP server over a shared environment `B`.
///
/// Handlers are closures taking the request [`Context`] and returning a boxed
/// future; `B` reaches them through [`Context::env`].
///
/// ```rust
/// use bonfire::Bonfire;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct Visits(AtomicUsize);
///
/// let mut app = Bonfire::<Visits>::default();
/// app.get("/", |c| {
///     Box::pin(async move {
///         let seen = c.env().0.fetch_add(1, Ordering::SeqCst);
///         c.text(format!("visit #{}", seen + 1))
///     })
/// })
/// .unwrap();
/// ```
///
/// Registration takes `&mut self` and must happen before [`Bonfire::fire`];
/// share the configured instance behind an `Arc` to `fire` and `finish` it
/// from different tasks.
pub struct Bonfire<B> {
    pub(crate) core: Arc<Core<B>>,
    pub(crate) lifecycle: Lifecycle,
}

impl<B: Default + Send + Sync + 'static> Default for Bonfire<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: Send + Sync + 'static> Bonfire<B> {
    pub fn new(env: B) -> Self {
        Self::with_env(Arc::new(env))
    }

    /// Uses an environment the caller keeps a handle on.
    pub fn with_env(env: Arc<B>) -> Self {
        Self::build(env, Box::new(TrieRouter::new()))
    }

    /// Swaps the trie for another [`Router`] implementation.
    pub fn with_router<R: Router<B>>(env: B, router: R) -> Self {
        Self::build(Arc::new(env), Box::new(router))
    }

    fn build(env: Arc<B>, router: Box<dyn Router<B>>) -> Self {
        let config = Config::default();
        Self {
            core: Arc::new(Core {
                pool: ContextPool::new(Arc::clone(&env), config.pool_capacity),
                env,
                router,
                on_error: handler::default_error_handler(),
                blow: Blow::new(),
                config,
                tls: None,
            }),
            lifecycle: Lifecycle::new(),
        }
    }

    /// # Panics
    ///
    /// When called while the server holds the instance, i.e. after `fire`.
    fn core_mut(&mut self) -> &mut Core<B> {
        Arc::get_mut(&mut self.core).expect("Cannot modify the server after it has been fired")
    }

    pub fn env(&self) -> &Arc<B> {
        &self.core.env
    }

    pub fn config(&mut self, config: Config) -> &mut Self {
        let core = self.core_mut();
        core.pool = ContextPool::new(Arc::clone(&core.env), config.pool_capacity);
        core.config = config;
        self
    }

    pub fn max_connections(&mut self, max_connections: usize) -> &mut Self {
        self.core_mut().config.max_connections = max_connections;
        self
    }

    pub fn keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.core_mut().config.keep_alive = keep_alive;
        self
    }

    pub fn max_body_size(&mut self, max_body_size: usize) -> &mut Self {
        self.core_mut().config.max_body_size = max_body_size;
        self
    }

    /// Caps the request line plus headers; larger heads get 431.
    pub fn max_header_size(&mut self, max_header_size: usize) -> &mut Self {
        self.core_mut().config.max_header_size = max_header_size;
        self
    }

    pub fn max_headers(&mut self, max_headers: usize) -> &mut Self {
        self.core_mut().config.max_headers = max_headers;
        self
    }

    pub fn pool_capacity(&mut self, capacity: usize) -> &mut Self {
        let core = self.core_mut();
        core.config.pool_capacity = capacity;
        core.pool = ContextPool::new(Arc::clone(&core.env), capacity);
        self
    }

    /// Serves HTTPS with the PEM certificate chain and private key at these paths.
    pub fn with_tls<P: AsRef<Path>>(&mut self, cert_file: P, key_file: P) -> &mut Self {
        self.core_mut().tls = Some(TlsConfig::new(cert_file, key_file));
        self
    }

    /// Registers a handler value for `method`; closures go through [`Bonfire::route`].
    pub fn handle<H: Handler<B>>(&mut self, method: &str, path: &str, handler: H) -> Result<()> {
        self.core_mut().router.add(method, path, Arc::new(handler))
    }

    pub fn route<F>(&mut self, method: &str, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.handle(method, path, handler)
    }

    pub fn get<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::GET.as_str(), path, handler)
    }

    pub fn post<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::POST.as_str(), path, handler)
    }

    pub fn put<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::PUT.as_str(), path, handler)
    }

    pub fn patch<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::PATCH.as_str(), path, handler)
    }

    pub fn delete<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::DELETE.as_str(), path, handler)
    }

    pub fn head<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::HEAD.as_str(), path, handler)
    }

    pub fn options<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::OPTIONS.as_str(), path, handler)
    }

    pub fn trace<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::TRACE.as_str(), path, handler)
    }

    pub fn connect<F>(&mut self, path: &str, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route(Method::CONNECT.as_str(), path, handler)
    }

    /// Attaches a middleware closure at `path` for every method.
    ///
    /// `"*"` and `"/"` cover every route; `"/api/*"` and `"/api"` cover
    /// `/api` and everything below it.
    ///
    /// ```rust
    /// use bonfire::Bonfire;
    ///
    /// let mut app = Bonfire::new(());
    /// app.use_fn("*", |c, next| {
    ///     Box::pin(async move {
    ///         next.handle(c).await?;
    ///         c.response_mut().header("X-Served-By", "bonfire");
    ///         Ok(())
    ///     })
    /// })
    /// .unwrap();
    /// ```
    pub fn use_fn<F>(&mut self, path: &str, f: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context<B>, Next<B>) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.use_middlewares(path, &[middleware::from_fn(f)])
    }

    /// Attaches a middleware value, such as [`crate::middleware::Timeout`].
    pub fn middleware<M: Middleware<B>>(&mut self, path: &str, middleware: M) -> Result<()> {
        let middleware: BoxedMiddleware<B> = Arc::new(middleware);
        self.use_middlewares(path, &[middleware])
    }

    /// Attaches several middlewares at once; they run in slice order.
    pub fn use_middlewares(&mut self, path: &str, middlewares: &[BoxedMiddleware<B>]) -> Result<()> {
        self.core_mut().router.use_middleware(path, middlewares)
    }

    /// Registers a background task; see [`BlowTask`].
    pub fn blow(&mut self, task: BlowTask<B>) -> &mut Self {
        self.core_mut().blow.push(task);
        self
    }

    /// Replaces the default error handler, which replies 500 with the error text.
    ///
    /// If this handler fails too, the client gets a bare 500.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<B>, BoxError) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.core_mut().on_error = Arc::new(handler);
        self
    }

    /// Replaces the default handler for background task errors, which logs them.
    pub fn on_blow_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&TaskContext, &BoxError) + Send + Sync + 'static,
    {
        self.core_mut().blow.set_error_handler(Arc::new(handler));
        self
    }

    /// Runs one request through routing, middlewares and handlers, without a socket.
    pub async fn dispatch(&self, request: Request) -> Response {
        self.core.dispatch(request).await
    }
}

impl<B: Send + Sync + 'static> Core<B> {
    pub(crate) async fn dispatch(&self, request: Request) -> Response {
        let mut ctx = self.pool.acquire(request);

        let route = {
            let found = self.router.find(ctx.request().method(), ctx.request().path());
            found.handler().cloned().map(|handler| {
                let params = found
                    .params
                    .into_iter()
                    .map(|(name, value)| (name, decode_segment(&value)))
                    .collect();
                (compose(handler, &found.middlewares), params)
            })
        };
        let Some((chain, params)) = route else {
            tracing::debug!(method = %ctx.request().method(), path = %ctx.request().path(), "no route");
            ctx.response_mut().clear(404);
            return ctx.take_response();
        };
        ctx.set_params(params);

        let outcome = AssertUnwindSafe(chain.call(&mut *ctx)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if let Err(err) = (self.on_error)(&mut *ctx, err).await {
                    tracing::error!(error = %err, "error handler failed");
                    ctx.response_mut().clear(500);
                }
            }
            Err(panic) => {
                tracing::error!(panic = %panic_message(panic.as_ref()), "handler panicked");
                ctx.response_mut().clear(500);
            }
        }
        ctx.take_response()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Unknown panic".to_string()
    }
}
