//! Rate limiting that collapses bursts of raw events into deliveries.
//!
//! One `RateLimiter` belongs to one subscription. The strategy is chosen once
//! from the subscription's `RateLimitPolicy`:
//!
//! - `None` delivers every event synchronously on the calling thread.
//! - `Throttle` opens a fixed window on the first buffered event and
//!   delivers everything buffered when it closes. Later arrivals never extend
//!   the window.
//! - `Debounce` delivers once no event has arrived for a full window. Every
//!   arrival replaces the pending timer.
//!
//! Window state lives behind one `parking_lot` mutex per limiter. Timers are
//! tokio tasks, so ingestion never waits on a window.

use std::{mem::take, sync::Arc, time::Duration};

use {
    parking_lot::Mutex,
    tokio::{runtime::Handle, task::JoinHandle, time::sleep},
    tracing::{debug, trace},
};

use crate::{
    state::lifecycle::{Lifecycle, LifecycleCell},
    watch::{
        config::RateLimitPolicy,
        events::{AggregatedChangeEvent, RawChangeEvent},
        sink::EventSink,
    },
};

/// Delivery strategy selected from a `RateLimitPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    PassThrough,
    Throttle(Duration),
    Debounce(Duration),
}

impl From<RateLimitPolicy> for Strategy {
    fn from(policy: RateLimitPolicy) -> Self {
        match policy.normalized() {
            RateLimitPolicy::None => Self::PassThrough,
            RateLimitPolicy::Throttle(window) => Self::Throttle(window),
            RateLimitPolicy::Debounce(window) => Self::Debounce(window),
        }
    }
}

/// Buffer and timer of the window currently open.
#[derive(Default)]
struct Window {
    /// Events buffered since the last delivery, in arrival order.
    buffer: Vec<RawChangeEvent>,
    /// Bumped whenever a timer is scheduled; a timer only delivers if it
    /// still carries the current value.
    sequence: u64,
    /// The one outstanding timer, if any.
    timer: Option<JoinHandle<()>>,
}

/// State shared between the limiter and its timers.
struct Shared {
    source_identifier: String,
    lifecycle: LifecycleCell,
    sink: Arc<dyn EventSink>,
    window: Mutex<Window>,
    /// Held while handing a batch to the sink so windows are delivered in
    /// the order they closed.
    emit: Mutex<()>,
}

impl Shared {
    /// Closes the window if `sequence` is still current.
    fn expire(&self, sequence: u64) {
        let mut window = self.window.lock();
        if window.sequence != sequence {
            trace!(
                "Timer {} for '{}' superseded by {}",
                sequence, self.source_identifier, window.sequence
            );
            return;
        }

        let batch = take(&mut window.buffer);
        window.timer = None;

        let _emit = self.emit.lock();
        drop(window);
        self.deliver(batch);
    }

    /// Hands a closed window to the sink if the subscription is still active.
    fn deliver(&self, batch: Vec<RawChangeEvent>) {
        let Some(aggregate) = AggregatedChangeEvent::from_batch(batch) else {
            return;
        };

        match self.lifecycle.get() {
            Lifecycle::Active => {
                self.sink
                    .deliver(&self.source_identifier, aggregate.into_delivered());
            }
            Lifecycle::Suspended => {
                debug!(
                    "Discarding {} buffered event(s) for suspended '{}'",
                    aggregate.len(),
                    self.source_identifier
                );
            }
            Lifecycle::Stopped => {
                debug!(
                    "Dropping late delivery of {} event(s) for stopped '{}'",
                    aggregate.len(),
                    self.source_identifier
                );
            }
        }
    }
}

/// Per-subscription rate limiter.
pub struct RateLimiter {
    strategy: Strategy,
    shared: Arc<Shared>,
    runtime: Handle,
}

impl RateLimiter {
    /// Creates a limiter for one subscription.
    ///
    /// # Arguments
    ///
    /// * `policy` - Rate limit policy; zero windows behave as `None`.
    /// * `source_identifier` - Identifier passed to the sink with every delivery.
    /// * `lifecycle` - Subscription state, checked before every delivery.
    /// * `sink` - Consumer of closed windows.
    /// * `runtime` - Runtime the window timers are spawned on.
    ///
    /// # Returns
    ///
    /// A new `RateLimiter` with an empty buffer and no timer.
    pub fn new(
        policy: RateLimitPolicy,
        source_identifier: impl Into<String>,
        lifecycle: LifecycleCell,
        sink: Arc<dyn EventSink>,
        runtime: Handle,
    ) -> Self {
        Self {
            strategy: policy.into(),
            shared: Arc::new(Shared {
                source_identifier: source_identifier.into(),
                lifecycle,
                sink,
                window: Mutex::new(Window::default()),
                emit: Mutex::new(()),
            }),
            runtime,
        }
    }

    /// Effective policy after normalization.
    pub fn policy(&self) -> RateLimitPolicy {
        match self.strategy {
            Strategy::PassThrough => RateLimitPolicy::None,
            Strategy::Throttle(window) => RateLimitPolicy::Throttle(window),
            Strategy::Debounce(window) => RateLimitPolicy::Debounce(window),
        }
    }

    /// Accepts one raw event.
    ///
    /// Never waits on a window: buffered strategies only record the event
    /// and, when needed, schedule a timer.
    pub fn submit(&self, event: RawChangeEvent) {
        match self.strategy {
            Strategy::PassThrough => {
                let _emit = self.shared.emit.lock();
                self.shared.deliver(vec![event]);
            }
            Strategy::Throttle(duration) => {
                let mut window = self.shared.window.lock();
                window.buffer.push(event);
                if window.timer.is_none() {
                    window.sequence += 1;
                    let sequence = window.sequence;
                    window.timer = Some(self.schedule(duration, sequence));
                }
            }
            Strategy::Debounce(duration) => {
                let mut window = self.shared.window.lock();
                window.buffer.push(event);
                window.sequence += 1;
                let sequence = window.sequence;
                if let Some(previous) = window.timer.take() {
                    previous.abort();
                }
                window.timer = Some(self.schedule(duration, sequence));
            }
        }
    }

    /// Number of events waiting for their window to close.
    pub fn pending(&self) -> usize {
        self.shared.window.lock().buffer.len()
    }

    /// Whether a window timer is outstanding.
    pub fn is_armed(&self) -> bool {
        self.shared.window.lock().timer.is_some()
    }

    /// Aborts the outstanding timer and drops the buffer.
    ///
    /// A timer that already started expiring finds its sequence stale and
    /// delivers nothing.
    ///
    /// # Returns
    ///
    /// The number of buffered events that were dropped.
    pub fn cancel(&self) -> usize {
        let mut window = self.shared.window.lock();
        window.sequence += 1;
        if let Some(timer) = window.timer.take() {
            timer.abort();
        }
        take(&mut window.buffer).len()
    }

    fn schedule(&self, duration: Duration, sequence: u64) -> JoinHandle<()> {
        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            sleep(duration).await;
            shared.expire(sequence);
        })
    }
}
