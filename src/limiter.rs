//! Process-wide concurrency limiter (C1)
//!
//! A counting semaphore capping engine invocations in flight across every
//! session. Grounded on the same `tokio::sync::Semaphore` + cancellation
//! race used in `other_examples/.../audio-transcriber/src/main.rs`
//! (`transcription_sem.clone().try_acquire_owned()` guarding a single
//! shared Whisper context) and on the teacher's `tokio::select!` idiom in
//! `call_server.rs::start_audio_loop` for racing a long-lived wait
//! against a cancellation receiver.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

/// A scoped permit. Releasing happens on drop, so every exit path —
/// success, error, or cancellation — releases exactly once.
pub struct Lease(#[allow(dead_code)] OwnedSemaphorePermit);

#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent >= 1, "max_concurrent must be >= 1");
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Suspends until a permit is free or `cancel` fires. A cancelled
    /// acquire consumes no permit.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Lease, GatewayError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                let permit = permit.expect("semaphore is never closed");
                Ok(Lease(permit))
            }
        }
    }

    #[cfg(test)]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
