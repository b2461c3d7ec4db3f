//! # Bonfire
//!
//! A small async HTTP server core: per-method routing tries with `:name`
//! parameters, onion-style middlewares, pooled request contexts and
//! background tasks tied to the server's start and stop.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bonfire::Bonfire;
//!
//! #[tokio::main]
//! async fn main() -> bonfire::Result<()> {
//!     bonfire::logging::init();
//!
//!     let mut app = Bonfire::new(());
//!     app.get("/users/:id", |c| {
//!         Box::pin(async move {
//!             let id = c.param("id").unwrap_or_default().to_string();
//!             c.text(format!("user {id}"))
//!         })
//!     })?;
//!
//!     app.fire(":3000").await
//! }
//! ```
//!
//! ## Middleware Usage
//!
//! ```rust
//! use bonfire::{middleware::Timeout, Bonfire};
//! use std::time::Duration;
//!
//! let mut app = Bonfire::new(());
//! app.middleware("/api/*", Timeout::new(Duration::from_secs(3))).unwrap();
//! ```
//!
//! ## Shutting Down
//!
//! ```rust,no_run
//! use bonfire::{BlowTask, Bonfire};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> bonfire::Result<()> {
//! let mut app = Bonfire::new(());
//! app.blow(BlowTask::on_stop(|_ctx, _env| async { Ok(()) }));
//!
//! let app = Arc::new(app);
//! let server = tokio::spawn({
//!     let app = Arc::clone(&app);
//!     async move { app.fire(":3000").await }
//! });
//! app.listening().await?;
//! app.finish_within(Duration::from_secs(10)).await?;
//! # let _ = server.await;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod blow;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod pool;
pub mod router;
pub mod server;
pub extern crate serde_json;

pub use app::Bonfire;
pub use blow::{BlowKind, BlowTask, Phase, TaskContext};
pub use config::Config;
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use handler::{Handler, HandlerResult};
pub use http::{Method, Request, Response};
pub use middleware::{Middleware, Next};
pub use server::{State, TlsConfig};

// Reexport serde_json
pub use serde_json::{json, Value};
