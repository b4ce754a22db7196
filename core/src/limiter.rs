//! Composite token-bucket admission control.
//!
//! # Design
//! A `RateLimiter` owns an ordered set of buckets and a FIFO queue of
//! callers waiting for admission. An admission must fit every bucket at
//! once, so a short burst window and a long sustained window can be layered
//! the way the remote API layers them.
//!
//! Callers never touch the buckets. `admit` appends the caller to the queue
//! and, if no drain task is running, spawns one. The drain task grants the
//! head of the queue whenever every bucket has room, and otherwise sleeps
//! until the exact instant the blocking windows end. It exits as soon as the
//! queue is empty, so an idle limiter owns no task and no timer.
//!
//! Buckets and queue sit behind one `parking_lot::Mutex`. The fullness check
//! and the admission write happen under the same guard, and the guard is
//! never held across an `.await`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::bucket::{Bucket, BucketConfig};
use crate::error::ClientError;

/// Permission for one call to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Position in grant order, starting at 0. Equals submission order.
    pub sequence: u64,
    pub granted_at: Instant,
}

/// Shared admission controller. Cloning yields another handle to the same
/// buckets and queue.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
}

struct State {
    buckets: Vec<Bucket>,
    queue: VecDeque<Waiter>,
    draining: bool,
    next_ticket: u64,
    granted: u64,
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<Result<Grant, ClientError>>,
}

enum Step {
    Idle,
    WaitUntil(Instant),
}

impl RateLimiter {
    /// A limiter over `buckets`. Fails with `ClientError::Config` if any bucket
    /// has zero capacity or a zero window.
    pub fn new(buckets: &[BucketConfig]) -> Result<Self, ClientError> {
        for (index, config) in buckets.iter().enumerate() {
            config.validate(index)?;
        }
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    buckets: buckets.iter().copied().map(Bucket::new).collect(),
                    queue: VecDeque::new(),
                    draining: false,
                    next_ticket: 0,
                    granted: 0,
                }),
            }),
        })
    }

    /// Joins the back of the admission queue.
    ///
    /// The returned future resolves once this caller reaches the head of the
    /// queue and every bucket has room. If no drain task is running, one is
    /// spawned on the current Tokio runtime; without a runtime this admission
    /// fails with `ClientError::Config` and the rest of the queue is left
    /// for the next caller that has one.
    pub fn admit(&self) -> Admission {
        let (tx, rx) = oneshot::channel();
        let ticket = {
            let mut state = self.inner.state.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.queue.push_back(Waiter { ticket, tx });
            ticket
        };

        if let Err(err) = self.inner.ensure_draining() {
            self.inner.reject(ticket, err);
        }

        Admission {
            ticket,
            rx,
            inner: Arc::clone(&self.inner),
            finished: false,
        }
    }

    /// Point-in-time view of the buckets and queue.
    pub fn snapshot(&self) -> LimiterSnapshot {
        let now = Instant::now();
        let state = self.inner.state.lock();
        LimiterSnapshot {
            buckets: state
                .buckets
                .iter()
                .map(|bucket| {
                    let remaining = bucket.remaining(now);
                    BucketSnapshot {
                        capacity: bucket.capacity(),
                        window: bucket.window(),
                        used: bucket.capacity() - remaining,
                        remaining,
                        resets_in: (!bucket.is_expired(now))
                            .then(|| bucket.resets_at())
                            .flatten()
                            .map(|at| at.saturating_duration_since(now)),
                    }
                })
                .collect(),
            queued: state.queue.len(),
            granted: state.granted,
            draining: state.draining,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Inner {
    /// Removes a waiter that has not been admitted yet. Bucket state and the
    /// other waiters are left alone.
    fn withdraw(&self, ticket: u64) -> bool {
        let mut state = self.state.lock();
        match state.queue.iter().position(|w| w.ticket == ticket) {
            Some(index) => {
                state.queue.remove(index);
                trace!(ticket, "admission withdrawn");
                true
            }
            None => false,
        }
    }

    /// Spawns a drain task if waiters are queued and none is running.
    fn ensure_draining(self: &Arc<Self>) -> Result<(), ClientError> {
        let handle = {
            let mut state = self.state.lock();
            if state.draining || state.queue.is_empty() {
                return Ok(());
            }
            let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                ClientError::Config("rate limiter requires a Tokio runtime".to_string())
            })?;
            state.draining = true;
            handle
        };
        handle.spawn(drain(DrainGuard {
            inner: Arc::clone(self),
            finished: false,
        }));
        Ok(())
    }

    /// Fails one queued waiter. The others keep their place.
    fn reject(&self, ticket: u64, err: ClientError) -> bool {
        let waiter = {
            let mut state = self.state.lock();
            let index = state.queue.iter().position(|w| w.ticket == ticket);
            index.and_then(|index| state.queue.remove(index))
        };
        match waiter {
            Some(waiter) => {
                let _ = waiter.tx.send(Err(err));
                true
            }
            None => false,
        }
    }
}

impl State {
    /// Grants queued callers while every bucket has room.
    fn step(&mut self, now: Instant) -> Step {
        loop {
            match self.queue.front() {
                None => {
                    self.draining = false;
                    return Step::Idle;
                }
                Some(head) if head.tx.is_closed() => {
                    self.queue.pop_front();
                    continue;
                }
                Some(_) => {}
            }

            if let Some(until) = self.blocked_until(now) {
                return Step::WaitUntil(until);
            }

            let Some(waiter) = self.queue.pop_front() else {
                continue;
            };
            let outcome = self.record_admission(now).map(|()| {
                let grant = Grant {
                    sequence: self.granted,
                    granted_at: now,
                };
                self.granted += 1;
                grant
            });
            match &outcome {
                Ok(grant) => trace!(ticket = waiter.ticket, sequence = grant.sequence, "admission granted"),
                Err(err) => {
                    error!(ticket = waiter.ticket, %err, "admission recorded against a full bucket");
                    debug_assert!(false, "{err}");
                }
            }
            let _ = waiter.tx.send(outcome);
        }
    }

    /// The instant every currently full bucket has expired, if any is full.
    fn blocked_until(&self, now: Instant) -> Option<Instant> {
        self.buckets
            .iter()
            .filter(|bucket| bucket.is_full(now))
            .filter_map(Bucket::resets_at)
            .max()
    }

    /// Counts one admission against every bucket, or none of them.
    fn record_admission(&mut self, now: Instant) -> Result<(), ClientError> {
        if let Some(bucket) = self.buckets.iter().position(|b| b.is_full(now)) {
            return Err(ClientError::BucketExhausted { bucket });
        }
        for bucket in &mut self.buckets {
            bucket.record(now);
        }
        Ok(())
    }
}

/// Clears `draining` if the drain task is dropped before it finishes, as
/// happens when its runtime shuts down before or during a sleep. Waiters
/// still queued restart the drain from their next poll or the next `admit`.
struct DrainGuard {
    inner: Arc<Inner>,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.state.lock().draining = false;
            debug!("drain task dropped before the queue emptied");
        }
    }
}

async fn drain(mut guard: DrainGuard) {
    loop {
        let now = Instant::now();
        let until = match guard.inner.state.lock().step(now) {
            Step::Idle => {
                guard.finished = true;
                return;
            }
            Step::WaitUntil(until) => until,
        };
        debug!(
            wait_ms = until.saturating_duration_since(now).as_millis() as u64,
            "rate-limit windows exhausted, waiting for reset"
        );
        tokio::time::sleep_until(until).await;
    }
}

/// A pending admission. Resolves to a `Grant` once admitted.
///
/// Dropping it before admission withdraws the caller from the queue. After
/// admission the slot is spent whether or not the result is observed.
#[must_use = "an admission does nothing unless awaited"]
pub struct Admission {
    ticket: u64,
    rx: oneshot::Receiver<Result<Grant, ClientError>>,
    inner: Arc<Inner>,
    finished: bool,
}

impl Admission {
    /// Submission order of this admission, starting at 0.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// A handle that can withdraw this admission from another task.
    pub fn handle(&self) -> AdmissionHandle {
        AdmissionHandle {
            ticket: self.ticket,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Withdraws from the queue. Returns `false` if already admitted.
    pub fn cancel(mut self) -> bool {
        self.finished = true;
        self.inner.withdraw(self.ticket)
    }
}

impl Future for Admission {
    type Output = Result<Grant, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => match self.inner.ensure_draining() {
                Ok(()) => return Poll::Pending,
                Err(err) => {
                    if !self.inner.withdraw(self.ticket) {
                        return Poll::Pending;
                    }
                    Err(err)
                }
            },
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(ClientError::Cancelled),
        };
        self.finished = true;
        Poll::Ready(result)
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.withdraw(self.ticket);
        }
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("ticket", &self.ticket)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Cancels a pending admission without owning it. The admission then
/// resolves to `ClientError::Cancelled`.
#[derive(Debug, Clone)]
pub struct AdmissionHandle {
    ticket: u64,
    inner: Weak<Inner>,
}

impl AdmissionHandle {
    /// Returns `false` if the caller was already admitted or withdrawn.
    pub fn cancel(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.withdraw(self.ticket))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketSnapshot {
    pub capacity: u32,
    pub window: Duration,
    pub used: u32,
    pub remaining: u32,
    /// Time until the current window ends; `None` when no window is open.
    pub resets_in: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterSnapshot {
    pub buckets: Vec<BucketSnapshot>,
    pub queued: usize,
    /// Admissions granted since the limiter was created.
    pub granted: u64,
    pub draining: bool,
}
