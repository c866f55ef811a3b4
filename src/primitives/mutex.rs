//! Machine-backed mutex: a [`Semaphore`] with a single slot.

use super::semaphore::{PrimitiveEngine, Semaphore, SemaphoreSlot};
use crate::error::EngineResult;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Guard for a held [`Mutex`]; release it with [`SemaphoreSlot::release`]
pub type MutexGuard = SemaphoreSlot;

#[derive(Clone, Debug)]
pub struct Mutex {
    semaphore: Semaphore,
}

impl Mutex {
    pub async fn create(
        engine: &PrimitiveEngine,
        machine_id: Option<String>,
    ) -> EngineResult<Self> {
        Ok(Self {
            semaphore: Semaphore::create(engine, 1, machine_id).await?,
        })
    }

    pub async fn attach(engine: &PrimitiveEngine, machine_id: &str) -> EngineResult<Self> {
        Ok(Self {
            semaphore: Semaphore::attach(engine, machine_id).await?,
        })
    }

    pub fn machine_id(&self) -> &str {
        self.semaphore.machine_id()
    }

    pub async fn is_locked(&self) -> EngineResult<bool> {
        Ok(self.semaphore.held().await? > 0)
    }

    /// Wait for the lock until it frees up or `cancel` fires
    pub async fn lock(&self, cancel: &CancellationToken) -> EngineResult<MutexGuard> {
        self.semaphore.enter(cancel).await
    }

    /// Take the lock only if it is free right now
    pub async fn try_lock(&self) -> EngineResult<Option<MutexGuard>> {
        self.semaphore.try_acquire().await
    }

    /// Run `f` under the lock; the lock is released before returning
    pub async fn with_lock<F, Fut, T>(&self, cancel: &CancellationToken, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.semaphore.with_slot(cancel, f).await
    }
}
