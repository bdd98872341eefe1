//! Resilient page iterator over paginated listing calls.
//!
//! A [`Pager`] turns a `fetch(cursor) -> Page` call into a lazy sequence of
//! [`Pull`]s. Remote failures come back as data instead of escaping, rate
//! limits are retried from the same continuation cursor, and an operator
//! abort stops every pager sharing the same [`AbortSignal`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::operator::{Operator, ThrottleDecision};

/// One page of a remote listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation cursor of the next page; `None` on the last page.
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<String>) -> Self {
        Self { items, next }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Outcome of a single pull.
#[derive(Debug)]
pub enum Pull<T> {
    Item(T),
    /// The remote call failed; the caller logs and skips.
    Skipped(Error),
    /// The operator asked to stop. Break out and keep partial results.
    Abort,
    /// Natural end of the sequence; produced exactly once.
    End,
}

/// Upper bound on a single throttle back-off.
pub const MAX_THROTTLE_WAIT: Duration = Duration::from_secs(15 * 60);

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has been triggered.
    pub async fn triggered(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent trigger is not missed.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// Rate-limit handling knobs.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    /// Added on top of the server's retry-after.
    pub margin: Duration,
    /// Consecutive rate limits tolerated on one cursor.
    pub max_retries: u32,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(10),
            max_retries: 1,
        }
    }
}

/// Everything a remote call needs to survive throttling and honor aborts.
#[derive(Clone)]
pub struct Resilience {
    pub policy: ThrottlePolicy,
    pub operator: Arc<dyn Operator>,
    pub abort: AbortSignal,
}

/// Result of a throttle-aware call.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Failed(Error),
    Aborted,
}

impl Resilience {
    pub fn new(policy: ThrottlePolicy, operator: Arc<dyn Operator>) -> Self {
        Self {
            policy,
            operator,
            abort: AbortSignal::new(),
        }
    }

    /// Run `call`, retrying rate limits up to the policy bound.
    pub async fn call<T, F, Fut>(&self, resource: &str, mut call: F) -> Attempt<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut throttled = 0u32;

        loop {
            if self.abort.is_triggered() {
                return Attempt::Aborted;
            }

            match call().await {
                Ok(value) => return Attempt::Done(value),
                Err(Error::Throttled { retry_after, .. })
                    if throttled < self.policy.max_retries =>
                {
                    throttled += 1;
                    let wait = retry_after
                        .saturating_add(self.policy.margin)
                        .min(MAX_THROTTLE_WAIT);

                    match self.operator.on_throttle(resource, wait) {
                        ThrottleDecision::Wait => {
                            warn!(
                                resource = resource,
                                attempt = throttled,
                                wait_secs = wait.as_secs(),
                                "Rate limited, waiting before retry"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(wait) => {}
                                _ = self.abort.triggered() => {
                                    warn!(
                                        resource = resource,
                                        "Aborted while waiting out rate limit"
                                    );
                                    return Attempt::Aborted;
                                }
                            }
                        }
                        ThrottleDecision::Abort => {
                            warn!(resource = resource, "Scan aborted by operator");
                            self.abort.trigger();
                            return Attempt::Aborted;
                        }
                    }
                }
                Err(e) => {
                    if e.is_throttled() {
                        warn!(
                            resource = resource,
                            retries = throttled,
                            "Still rate limited after retry, giving up"
                        );
                    }
                    return Attempt::Failed(e);
                }
            }
        }
    }
}

enum Cursor {
    Start,
    Next(String),
    Exhausted,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    /// A terminal error was reported; `End` is still owed.
    Ending,
    Done,
}

/// Lazy, resumable sequence over a paginated listing.
pub struct Pager<T, F> {
    fetch: F,
    resilience: Resilience,
    resource: String,
    buffer: VecDeque<T>,
    cursor: Cursor,
    state: State,
}

impl<T, F, Fut> Pager<T, F>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    pub fn new(resource: impl Into<String>, resilience: Resilience, fetch: F) -> Self {
        Self {
            fetch,
            resilience,
            resource: resource.into(),
            buffer: VecDeque::new(),
            cursor: Cursor::Start,
            state: State::Active,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Pull the next value. Returns `None` once `End` has been produced.
    pub async fn next(&mut self) -> Option<Pull<T>> {
        loop {
            if self.state == State::Done {
                return None;
            }

            if self.resilience.abort.is_triggered() {
                self.state = State::Done;
                self.buffer.clear();
                return Some(Pull::Abort);
            }

            if let Some(item) = self.buffer.pop_front() {
                return Some(Pull::Item(item));
            }

            if self.state == State::Ending {
                self.state = State::Done;
                return Some(Pull::End);
            }

            let token = match &self.cursor {
                Cursor::Start => None,
                Cursor::Next(token) => Some(token.clone()),
                Cursor::Exhausted => {
                    self.state = State::Done;
                    return Some(Pull::End);
                }
            };

            debug!(resource = %self.resource, cursor = ?token, "Fetching page");

            let fetch = &mut self.fetch;
            let attempt = self
                .resilience
                .call(&self.resource, || fetch(token.clone()))
                .await;

            match attempt {
                Attempt::Done(page) => {
                    self.buffer.extend(page.items);
                    self.cursor = match page.next {
                        Some(next) if !next.is_empty() => Cursor::Next(next),
                        _ => Cursor::Exhausted,
                    };
                }
                Attempt::Failed(e) => {
                    // The cursor cannot move past a page that was never fetched.
                    self.state = State::Ending;
                    return Some(Pull::Skipped(e));
                }
                Attempt::Aborted => {
                    self.state = State::Done;
                    return Some(Pull::Abort);
                }
            }
        }
    }
}
