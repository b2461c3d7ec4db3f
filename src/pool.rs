use crate::context::Context;
use crate::http::Request;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

/// Free list of request contexts shared by every connection.
pub struct ContextPool<B> {
    env: Arc<B>,
    idle: Mutex<Vec<Context<B>>>,
    capacity: usize,
}

impl<B> ContextPool<B> {
    pub fn new(env: Arc<B>, capacity: usize) -> Self {
        Self {
            env,
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Pops an idle context, or allocates one, and resets it for `request`.
    ///
    /// The context goes back to the pool when the returned guard drops,
    /// including while unwinding from a panic.
    pub fn acquire(&self, request: Request) -> PooledContext<'_, B> {
        let ctx = match self.lock().pop() {
            Some(mut ctx) => {
                ctx.reset(request);
                ctx
            }
            None => Context::new(request, Arc::clone(&self.env)),
        };
        PooledContext {
            pool: self,
            ctx: Some(ctx),
        }
    }

    /// Recycles `ctx`; it is simply dropped once `capacity` contexts are idle.
    pub fn release(&self, mut ctx: Context<B>) {
        ctx.recycle();
        let mut idle = self.lock();
        if idle.len() < self.capacity {
            idle.push(ctx);
        }
    }

    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Context<B>>> {
        // a panic while holding the lock cannot leave the Vec half-updated
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PooledContext<'p, B> {
    pool: &'p ContextPool<B>,
    ctx: Option<Context<B>>,
}

impl<B> Deref for PooledContext<'_, B> {
    type Target = Context<B>;

    fn deref(&self) -> &Context<B> {
        self.ctx.as_ref().expect("context is present until drop")
    }
}

impl<B> DerefMut for PooledContext<'_, B> {
    fn deref_mut(&mut self) -> &mut Context<B> {
        self.ctx.as_mut().expect("context is present until drop")
    }
}

impl<B> Drop for PooledContext<'_, B> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}
