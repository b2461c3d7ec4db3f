//! Background tasks bound to the server lifecycle.
//!
//! A task is either a trigger, run once when the server starts or stops, or a
//! cron schedule that ticks for as long as the server is up.

pub mod cron;

use self::cron::{CronScheduler, Job, Scheduler};
use crate::error::BoxError;
use crate::handler::HandlerResult;
use crate::http::Request;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlowKind {
    Trigger(Phase),
    /// Seconds-resolution cron expression.
    Schedule(String),
}

impl fmt::Display for BlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlowKind::Trigger(Phase::Start) => f.write_str("trigger:start"),
            BlowKind::Trigger(Phase::Stop) => f.write_str("trigger:stop"),
            BlowKind::Schedule(expression) => write!(f, "schedule:{expression}"),
        }
    }
}

/// What a background action sees of the server.
#[derive(Debug, Clone)]
pub struct TaskContext {
    request: Request,
    kind: BlowKind,
    token: CancellationToken,
}

impl TaskContext {
    fn new(kind: BlowKind, token: CancellationToken) -> Self {
        Self {
            request: Request::new("GET", "/"),
            kind,
            token,
        }
    }

    /// A synthetic `GET /`.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn kind(&self) -> &BlowKind {
        &self.kind
    }

    /// Cancelled once the server has finished shutting down.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

type BlowAction<B> =
    Arc<dyn Fn(TaskContext, Arc<B>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub(crate) type BlowErrorHandler = Arc<dyn Fn(&TaskContext, &BoxError) + Send + Sync>;

pub struct BlowTask<B> {
    kind: BlowKind,
    action: BlowAction<B>,
}

impl<B> Clone for BlowTask<B> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            action: Arc::clone(&self.action),
        }
    }
}

impl<B: Send + Sync + 'static> BlowTask<B> {
    pub fn new<F, Fut>(kind: BlowKind, action: F) -> Self
    where
        F: Fn(TaskContext, Arc<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            kind,
            action: Arc::new(move |ctx: TaskContext, env: Arc<B>| action(ctx, env).boxed()),
        }
    }

    /// Runs once, detached, right after the listener opens.
    ///
    /// ```rust
    /// use bonfire::{BlowTask, Bonfire};
    ///
    /// let mut app = Bonfire::new(());
    /// app.blow(BlowTask::on_start(|ctx, _env| async move {
    ///     assert_eq!(ctx.request().path(), "/");
    ///     Ok(())
    /// }));
    /// ```
    pub fn on_start<F, Fut>(action: F) -> Self
    where
        F: Fn(TaskContext, Arc<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(BlowKind::Trigger(Phase::Start), action)
    }

    /// Runs once during shutdown; `finish` waits for it.
    pub fn on_stop<F, Fut>(action: F) -> Self
    where
        F: Fn(TaskContext, Arc<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(BlowKind::Trigger(Phase::Stop), action)
    }

    /// Runs on every tick of `expression` while the server is up.
    ///
    /// Expressions follow the `cron` crate: seconds come first, and numeric
    /// weekdays run 1-7 starting at Sunday = 1, so `0` is not Sunday. Prefer
    /// names (`Sun`, `Mon-Fri`). Interval shorthands such as `@every 5s` are
    /// not supported; write `*/5 * * * * *` instead.
    pub fn schedule<F, Fut>(expression: impl Into<String>, action: F) -> Self
    where
        F: Fn(TaskContext, Arc<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(BlowKind::Schedule(expression.into()), action)
    }
}

impl<B> BlowTask<B> {
    pub fn kind(&self) -> &BlowKind {
        &self.kind
    }
}

/// Registered tasks plus the handler their errors go to.
pub(crate) struct Blow<B> {
    tasks: Vec<BlowTask<B>>,
    on_error: BlowErrorHandler,
}

/// Handle on what the start phase left running.
pub(crate) struct Blowing {
    scheduler: Option<CronScheduler>,
}

impl<B: Send + Sync + 'static> Blow<B> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            on_error: Arc::new(log_blow_error),
        }
    }

    pub fn push(&mut self, task: BlowTask<B>) {
        self.tasks.push(task);
    }

    pub fn set_error_handler(&mut self, handler: BlowErrorHandler) {
        self.on_error = handler;
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Spawns the start triggers and starts the cron jobs.
    ///
    /// Expressions the cron engine rejects are logged and skipped.
    pub fn start(&self, env: &Arc<B>, token: &CancellationToken) -> Blowing {
        tracing::debug!(tasks = self.len(), "starting background tasks");
        let mut scheduler: Option<CronScheduler> = None;
        for task in &self.tasks {
            match &task.kind {
                BlowKind::Trigger(Phase::Start) => {
                    let ctx = TaskContext::new(task.kind.clone(), token.child_token());
                    tokio::spawn(run(task, ctx, Arc::clone(env), Arc::clone(&self.on_error)));
                }
                BlowKind::Trigger(Phase::Stop) => {}
                BlowKind::Schedule(expression) => {
                    let job = self.job(task, env, token);
                    let scheduler = scheduler.get_or_insert_with(CronScheduler::new);
                    if let Err(err) = scheduler.schedule(expression, job) {
                        tracing::warn!(error = %err, "skipping scheduled task");
                    }
                }
            }
        }
        if let Some(scheduler) = scheduler.as_mut() {
            scheduler.start();
        }
        Blowing { scheduler }
    }

    /// Stops the cron jobs, then runs every stop trigger and waits for all of them.
    pub async fn stop(&self, mut blowing: Blowing, env: &Arc<B>, token: &CancellationToken) {
        if let Some(scheduler) = blowing.scheduler.as_mut() {
            scheduler.stop();
        }

        let mut triggers = JoinSet::new();
        for task in &self.tasks {
            if task.kind == BlowKind::Trigger(Phase::Stop) {
                let ctx = TaskContext::new(task.kind.clone(), token.child_token());
                triggers.spawn(run(task, ctx, Arc::clone(env), Arc::clone(&self.on_error)));
            }
        }
        while let Some(joined) = triggers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "stop trigger panicked");
            }
        }
    }

    fn job(&self, task: &BlowTask<B>, env: &Arc<B>, token: &CancellationToken) -> Job {
        let task = task.clone();
        let env = Arc::clone(env);
        let token = token.clone();
        let on_error = Arc::clone(&self.on_error);
        Arc::new(move || {
            let ctx = TaskContext::new(task.kind.clone(), token.child_token());
            run(&task, ctx, Arc::clone(&env), Arc::clone(&on_error)).boxed()
        })
    }
}

fn run<B: Send + Sync + 'static>(
    task: &BlowTask<B>,
    ctx: TaskContext,
    env: Arc<B>,
    on_error: BlowErrorHandler,
) -> impl Future<Output = ()> + Send + 'static {
    let action = Arc::clone(&task.action);
    async move {
        if let Err(err) = action(ctx.clone(), env).await {
            on_error(&ctx, &err);
        }
    }
}

fn log_blow_error(ctx: &TaskContext, err: &BoxError) {
    tracing::error!(task = %ctx.kind(), error = %err, "background task failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        started: AtomicUsize,
        stopped: AtomicUsize,
        ticks: AtomicUsize,
    }

    fn registry() -> Blow<Counters> {
        let mut blow = Blow::new();
        blow.push(BlowTask::on_start(|_, env: Arc<Counters>| async move {
            env.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        blow.push(BlowTask::on_stop(|_, env: Arc<Counters>| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            env.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        blow.push(BlowTask::on_stop(|_, env: Arc<Counters>| async move {
            env.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        blow
    }

    #[tokio::test]
    async fn start_triggers_run_detached() {
        let blow = registry();
        let env = Arc::new(Counters::default());
        let token = CancellationToken::new();

        let blowing = blow.start(&env, &token);
        assert!(blowing.scheduler.is_none());
        tokio::time::timeout(Duration::from_secs(1), async {
            while env.started.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(env.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_waits_for_every_stop_trigger() {
        let blow = registry();
        let env = Arc::new(Counters::default());
        let token = CancellationToken::new();

        let blowing = blow.start(&env, &token);
        blow.stop(blowing, &env, &token).await;
        assert_eq!(env.stopped.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_reach_the_blow_error_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut blow: Blow<()> = Blow::new();
        let sink = Arc::clone(&seen);
        blow.set_error_handler(Arc::new(move |ctx: &TaskContext, err: &BoxError| {
            sink.lock().unwrap().push(format!("{} {}", ctx.kind(), err));
        }));
        blow.push(BlowTask::on_stop(|ctx, _| async move {
            assert_eq!(ctx.request().path(), "/");
            Err("disk full".into())
        }));

        let env = Arc::new(());
        let token = CancellationToken::new();
        let blowing = blow.start(&env, &token);
        blow.stop(blowing, &env, &token).await;
        assert_eq!(*seen.lock().unwrap(), vec!["trigger:stop disk full".to_string()]);
    }

    #[tokio::test]
    async fn invalid_schedule_is_skipped() {
        let mut blow = Blow::new();
        blow.push(BlowTask::schedule("not a cron line", |_, env: Arc<Counters>| async move {
            env.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        blow.push(BlowTask::schedule("* * * * * *", |_, env: Arc<Counters>| async move {
            env.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert_eq!(blow.len(), 2);

        let env = Arc::new(Counters::default());
        let token = CancellationToken::new();
        let blowing = blow.start(&env, &token);
        let scheduler = blowing.scheduler.as_ref().unwrap();
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.is_running());

        tokio::time::timeout(Duration::from_millis(2500), async {
            while env.ticks.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        blow.stop(blowing, &env, &token).await;
    }

    #[test]
    fn kinds_display() {
        assert_eq!(BlowKind::Trigger(Phase::Start).to_string(), "trigger:start");
        assert_eq!(BlowKind::Schedule("* * * * * *".into()).to_string(), "schedule:* * * * * *");
    }
}
