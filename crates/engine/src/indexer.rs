// SPDX-License-Identifier: Apache-2.0

//! Shared building blocks for the metadata-coordinated indexer pattern:
//! batch accumulation with a size-or-timeout flush discipline, and the
//! metadata-gate polling loop every persistence indexer opens with.

use crate::error::{Error, ErrorKind};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Accumulates items into a batch, flushing when either the batch reaches
/// `batch_size` or `batch_timeout` has elapsed since the last flush,
/// whichever comes first. Bounded by `batch_size`: memory never exceeds
/// one batch's worth of buffered items.
pub struct BatchAccumulator<T> {
    items: Vec<T>,
    batch_size: usize,
    batch_timeout: Duration,
    last_flush: Instant,
}

impl<T> BatchAccumulator<T> {
    /// Creates an empty accumulator with the given flush discipline.
    #[must_use]
    pub fn new(batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            items: Vec::with_capacity(batch_size.max(1)),
            batch_size: batch_size.max(1),
            batch_timeout,
            last_flush: Instant::now(),
        }
    }

    /// Adds `item` to the pending batch.
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Whether the accumulator should flush right now: either it has
    /// reached `batch_size`, or `batch_timeout` has elapsed since the last
    /// flush and at least one item is pending.
    #[must_use]
    pub fn should_flush(&self) -> bool {
        if self.items.len() >= self.batch_size {
            return true;
        }
        !self.items.is_empty() && self.last_flush.elapsed() >= self.batch_timeout
    }

    /// Takes the pending batch and resets the flush timer. Returns `None`
    /// if there was nothing to flush.
    pub fn take(&mut self) -> Option<Vec<T>> {
        self.last_flush = Instant::now();
        if self.items.is_empty() {
            None
        } else {
            Some(std::mem::replace(
                &mut self.items,
                Vec::with_capacity(self.batch_size),
            ))
        }
    }

    /// Whether there are any items waiting to be flushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Polls `fetch` with `poll_interval` spacing until it returns `Ok`, until
/// `max_poll_duration` elapses, or until `token` is cancelled. Between
/// attempts it calls `on_release` so the caller can release a cached
/// connection before the idle wait (the "smart release" discipline).
///
/// `NOT_FOUND` results from `fetch` are expected and are not logged as
/// errors; exceeding `max_poll_duration` returns `Error` with kind
/// [`ErrorKind::Exhausted`], which the caller maps to a transition to
/// `ERROR`.
pub async fn poll_until_ready<T, F, Fut, R, ReleaseFut>(
    mut fetch: F,
    mut on_release: R,
    poll_interval: Duration,
    max_poll_duration: Duration,
    token: &CancellationToken,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
    R: FnMut() -> ReleaseFut,
    ReleaseFut: std::future::Future<Output = ()>,
{
    let deadline = Instant::now() + max_poll_duration;
    loop {
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            return Err(Error::Exhausted(
                "metadata gate exceeded max_poll_duration_ms".to_owned(),
            ));
        }

        on_release().await;

        tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(poll_interval) => {}
        }
    }
}
