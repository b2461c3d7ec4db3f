use bonfire::{json, BlowTask, Bonfire, Context, HandlerResult};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Bindings {
    greeting: String,
    heartbeats: AtomicU64,
}

#[derive(Debug)]
struct BadRequest;

impl fmt::Display for BadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bad request")
    }
}

impl std::error::Error for BadRequest {}

fn hello(c: &mut Context<Bindings>) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let message = c.env().greeting.clone();
        c.text(message)
    })
}

fn user(c: &mut Context<Bindings>) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let id = c.param("id").unwrap_or_default().to_string();
        if id.parse::<u64>().is_err() {
            return Err(BadRequest.into());
        }
        c.text(format!("user {id}"))
    })
}

#[tokio::main]
async fn main() -> bonfire::Result<()> {
    bonfire::logging::init();

    let mut app = Bonfire::new(Bindings {
        greeting: "hello world".to_string(),
        heartbeats: AtomicU64::new(0),
    });

    app.on_error(|c, err| {
        Box::pin(async move {
            if err.is::<BadRequest>() {
                return c.status(400).text(err.to_string());
            }
            c.status(500).text("internal-server-error")
        })
    });

    app.use_fn("*", |c, next| {
        Box::pin(async move {
            let started = std::time::Instant::now();
            let result = next.handle(c).await;
            tracing::info!(
                method = %c.request().method(),
                path = %c.request().path(),
                status = c.response().status,
                elapsed = ?started.elapsed(),
                "request"
            );
            result
        })
    })?;
    app.middleware("/slow/*", bonfire::middleware::Timeout::new(Duration::from_secs(1)))?;

    app.get("/hello", hello)?;
    app.get("/users/:id", user)?;
    app.get("/heartbeats", |c| {
        Box::pin(async move {
            let count = c.env().heartbeats.load(Ordering::Relaxed);
            c.text(format!("{count}"))
        })
    })?;
    app.get("/slow/sleep", |c| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            c.text("woke up")
        })
    })?;
    app.get("/error", |_| Box::pin(async { Err(BadRequest.into()) }))?;

    app.blow(BlowTask::on_start(|_, env: Arc<Bindings>| async move {
        tracing::info!(greeting = %env.greeting, "server is up");
        Ok(())
    }));
    app.blow(BlowTask::schedule("*/10 * * * * *", |_, env: Arc<Bindings>| async move {
        env.heartbeats.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }));
    app.blow(BlowTask::on_stop(|_, env: Arc<Bindings>| async move {
        let summary = json!({ "heartbeats": env.heartbeats.load(Ordering::Relaxed) });
        tracing::info!(%summary, "server is down");
        Ok(())
    }));

    let app = Arc::new(app);
    let server = tokio::spawn({
        let app = Arc::clone(&app);
        async move { app.fire(":8000").await }
    });

    tokio::signal::ctrl_c().await?;
    app.finish_within(Duration::from_secs(10)).await?;
    server.await.map_err(std::io::Error::other)?
}
