// src/exec/limiter.rs

//! Bounded-parallelism gate.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::trace;

use crate::errors::{Result, TaskchainError};

/// Runs at most `limit` units of work at the same time.
///
/// Units that cannot start immediately wait in a FIFO queue (tokio's
/// semaphore is fair), and a slot is handed to the next waiter as soon as a
/// running unit settles, whatever its outcome. The unit's own output is
/// returned untouched.
#[derive(Debug, Clone)]
pub struct Limiter {
    permits: Arc<Semaphore>,
    limit: usize,
    waiting: Arc<AtomicUsize>,
}

impl Limiter {
    /// Fails with a configuration error if `limit < 1`.
    pub fn new(limit: usize) -> Result<Self> {
        if limit < 1 {
            return Err(TaskchainError::config(
                "",
                format!("concurrency limit must be >= 1 (got {limit})"),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            waiting: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Units currently holding a slot.
    pub fn active(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Units queued behind the limit.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Run `work` once a slot is free.
    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let queued = Queued::enter(&self.waiting);
        // The semaphore is never closed, so acquisition cannot fail; holding
        // the result keeps the permit alive for the duration of `work`.
        let permit = self.permits.acquire().await;
        drop(queued);
        trace!(active = self.active(), limit = self.limit, "limiter slot acquired");

        let out = work.await;
        drop(permit);
        out
    }
}

/// Counts a unit as waiting until dropped, including when the `run` future
/// is dropped while still queued.
struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(Limiter::new(0).is_err());
        assert_eq!(Limiter::new(3).unwrap().limit(), 3);
    }

    #[tokio::test]
    async fn failure_of_a_unit_releases_its_slot() {
        let limiter = Limiter::new(1).unwrap();
        let first: std::result::Result<(), &str> = limiter.run(async { Err("boom") }).await;
        assert_eq!(first, Err("boom"));
        assert_eq!(limiter.active(), 0);
        let second = limiter.run(async { 42 }).await;
        assert_eq!(second, 42);
    }

    #[tokio::test]
    async fn dropping_a_queued_unit_clears_the_waiting_count() {
        let limiter = Limiter::new(1).unwrap();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .run(async move {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        while limiter.active() == 0 {
            tokio::task::yield_now().await;
        }

        let queued = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            limiter.run(async { 1 }),
        )
        .await;
        assert!(queued.is_err());
        assert_eq!(limiter.waiting(), 0);

        let _ = release_tx.send(());
        holder.await.unwrap();
        assert_eq!(limiter.active(), 0);
    }
}
