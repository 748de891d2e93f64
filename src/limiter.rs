use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::bucket::TokenBucket;
use crate::linked_list::{Key, LinkedList};

/// Default number of tokens added per second.
pub const DEFAULT_RATE: f64 = 80.0;
/// Default maximum number of tokens.
pub const DEFAULT_BURST: f64 = 25.0;

const DRAIN_FACTOR: f64 = 2.1;
const MIN_DRAIN_DELAY_MS: f64 = 15.0;
const MAX_DRAIN_DELAY_MS: f64 = 100.0;

/// The pause between drain passes for a bucket refilling at `rate` tokens per
/// second.
///
/// Roughly the time it takes to refill one token with some headroom, rounded
/// to whole milliseconds and kept within `15..=100` milliseconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use task_tamer::drain_delay;
///
/// assert_eq!(drain_delay(80.0), Duration::from_millis(26));
/// assert_eq!(drain_delay(1000.0), Duration::from_millis(15));
/// assert_eq!(drain_delay(1.0), Duration::from_millis(100));
/// ```
pub fn drain_delay(rate: f64) -> Duration {
    let millis = (DRAIN_FACTOR * (1000.0 / rate)).round();
    let millis = if millis.is_nan() {
        MAX_DRAIN_DELAY_MS
    } else {
        millis.clamp(MIN_DRAIN_DELAY_MS, MAX_DRAIN_DELAY_MS)
    };

    Duration::from_millis(millis as u64)
}

type Work = Box<dyn FnOnce() -> bool + Send + 'static>;

/// Builder for a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct Builder {
    rate: f64,
    burst: f64,
    initial: Option<f64>,
    drain_delay: Option<Duration>,
}

impl Builder {
    /// Number of tokens added per second.
    ///
    /// Defaults to `80`.
    #[inline]
    pub fn rate(&mut self, rate: f64) -> &mut Self {
        self.rate = rate;
        self
    }

    /// Maximum number of tokens, which is also the largest burst admitted
    /// without delay.
    ///
    /// Defaults to `25`.
    #[inline]
    pub fn burst(&mut self, burst: f64) -> &mut Self {
        self.burst = burst;
        self
    }

    /// The number of tokens the bucket starts out with.
    ///
    /// Saturates to `burst` when building. Defaults to a full bucket.
    #[inline]
    pub fn initial(&mut self, initial: f64) -> &mut Self {
        self.initial = Some(initial);
        self
    }

    /// Override the pause between drain passes.
    ///
    /// Defaults to [`drain_delay`] of the configured rate.
    #[inline]
    pub fn drain_delay(&mut self, drain_delay: Duration) -> &mut Self {
        self.drain_delay = Some(drain_delay);
        self
    }

    /// Construct a new rate limiter.
    ///
    /// # Panics
    ///
    /// Panics unless both the rate and the burst are finite and positive.
    pub fn build(&self) -> RateLimiter {
        let initial = self.initial.unwrap_or(self.burst);
        let bucket = TokenBucket::with_tokens(self.rate, self.burst, initial);
        let drain_delay = self.drain_delay.unwrap_or_else(|| drain_delay(self.rate));

        RateLimiter {
            shared: Arc::new(Shared {
                drain_delay,
                critical: Mutex::new(Critical {
                    bucket,
                    pending: LinkedList::new(),
                    draining: false,
                }),
            }),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            initial: None,
            drain_delay: None,
        }
    }
}

/// Critical state of the limiter, only accessed under its lock.
struct Critical {
    bucket: TokenBucket,
    pending: LinkedList<Work>,
    /// A drain loop is scheduled or running.
    draining: bool,
}

impl Critical {
    /// Claim the drain loop, returning the runtime to spawn it on.
    ///
    /// Returns `None` if a loop is already running, or if there is no runtime
    /// to run one on. In the latter case the work stays pending until work is
    /// next deferred from inside of a runtime.
    fn claim_drain(&mut self) -> Option<Handle> {
        if self.draining {
            return None;
        }

        let Ok(handle) = Handle::try_current() else {
            trace!(pending = self.pending.len(), "no runtime to drain on");
            return None;
        };

        self.draining = true;
        Some(handle)
    }
}

struct Shared {
    drain_delay: Duration,
    critical: Mutex<Critical>,
}

impl Shared {
    /// Release pending work for as long as the bucket admits it.
    ///
    /// Returns `true` once the pending list is empty, at which point the
    /// drain loop has been marked as stopped.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    fn drain(&self) -> bool {
        loop {
            let work = {
                let mut critical = self.critical.lock();

                if !critical.pending.is_empty() && !critical.bucket.try_acquire() {
                    trace!(remaining = critical.pending.len(), "bucket exhausted");
                    return false;
                }

                let Some(work) = critical.pending.pop_front() else {
                    critical.draining = false;
                    trace!("drained pending work");
                    return true;
                };

                work
            };

            // Work runs outside of the critical section so that it can
            // schedule more work. A token is only spent if it ran, and a
            // panicking unit of work counts as having run.
            match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(true) => {}
                Ok(false) => {
                    self.critical.lock().bucket.refund();
                }
                Err(..) => {
                    trace!("pending work panicked");
                }
            }
        }
    }
}

/// Owned by a running drain loop.
///
/// If the loop is torn down before it completes, as happens when its runtime
/// shuts down, the limiter is marked as no longer draining so that the next
/// deferred work starts a new loop.
struct Drain {
    shared: Arc<Shared>,
    completed: bool,
}

impl Drain {
    /// Spawn a drain loop claimed through [`Critical::claim_drain`].
    ///
    /// Must be called outside of the critical section, since a runtime which
    /// is shutting down drops the loop immediately.
    fn spawn(shared: Arc<Shared>, handle: &Handle) {
        trace!(delay = ?shared.drain_delay, "starting drain loop");

        let mut drain = Drain {
            shared,
            completed: false,
        };

        handle.spawn(async move {
            loop {
                tokio::time::sleep(drain.shared.drain_delay).await;

                if drain.shared.drain() {
                    break;
                }
            }

            drain.completed = true;
            trace!("drain loop stopped");
        });
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        if !self.completed {
            self.shared.critical.lock().draining = false;
            trace!("drain loop torn down");
        }
    }
}

/// Token-bucket admission scheduler.
///
/// Work scheduled while the bucket has tokens and nothing is pending runs
/// immediately on the calling thread. Anything else is appended to a FIFO
/// pending list which a single background drain loop releases as the bucket
/// refills.
///
/// A unit of work is a closure returning `true` if it ran, or `false` if it
/// chose not to (for example because the caller abandoned it), in which case
/// no token is spent on it.
///
/// Cloning the limiter gives another handle to the same limiter.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use task_tamer::RateLimiter;
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let limiter = RateLimiter::builder().rate(100.0).burst(2.0).build();
/// let count = Arc::new(AtomicUsize::new(0));
///
/// for _ in 0..3 {
///     let count = count.clone();
///
///     limiter.schedule(move || {
///         count.fetch_add(1, Ordering::SeqCst);
///         true
///     });
/// }
///
/// // The burst ran immediately, the third is pending.
/// assert_eq!(count.load(Ordering::SeqCst), 2);
/// assert_eq!(limiter.pending(), 1);
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Builder::default().build()
    }
}

impl RateLimiter {
    /// Construct a limiter with the given rate and burst and a full bucket.
    ///
    /// # Panics
    ///
    /// Panics unless both `rate` and `burst` are finite and positive.
    pub fn new(rate: f64, burst: f64) -> Self {
        Self::builder().rate(rate).burst(burst).build()
    }

    /// Construct a limiter through a builder.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Schedule a unit of work.
    ///
    /// If nothing is pending and a token is available, `work` runs before this
    /// returns. Otherwise it is queued behind all pending work and a drain
    /// loop is started unless one is already running.
    ///
    /// Deferred work scheduled outside of a Tokio runtime stays pending until
    /// work is next deferred from inside of one, which starts the drain loop.
    ///
    /// A panic in work that runs immediately propagates to the caller. A
    /// panic in deferred work is contained by the drain loop, which carries on
    /// with the rest.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn schedule<F>(&self, work: F) -> Scheduled
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        {
            let mut critical = self.shared.critical.lock();

            if !critical.pending.is_empty() || !critical.bucket.try_acquire() {
                let key = critical.pending.push_back(Box::new(work));
                let handle = critical.claim_drain();

                trace!(pending = critical.pending.len(), "deferred work");
                drop(critical);

                if let Some(handle) = handle {
                    Drain::spawn(self.shared.clone(), &handle);
                }

                return Scheduled {
                    shared: self.shared.clone(),
                    key: Some(key),
                };
            }
        }

        trace!("admitted work immediately");

        if !work() {
            self.shared.critical.lock().bucket.refund();
        }

        Scheduled {
            shared: self.shared.clone(),
            key: None,
        }
    }

    /// Schedule an asynchronous task.
    ///
    /// Once admitted the future is spawned on the Tokio runtime and counts as
    /// having run.
    ///
    /// # Panics
    ///
    /// Panics if the task is admitted outside of a Tokio runtime.
    pub fn schedule_async<F, Fut>(&self, task: F) -> Scheduled
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(move || {
            tokio::spawn(task());
            true
        })
    }

    /// Number of units of work waiting to be admitted.
    pub fn pending(&self) -> usize {
        self.shared.critical.lock().pending.len()
    }

    /// Test if a drain loop is scheduled or running.
    pub fn is_draining(&self) -> bool {
        self.shared.critical.lock().draining
    }

    /// Number of tokens currently in the bucket.
    ///
    /// This is a best-effort snapshot. It does not guarantee that the next
    /// call to [`schedule`] is admitted immediately.
    ///
    /// [`schedule`]: RateLimiter::schedule
    pub fn tokens(&self) -> f64 {
        let mut critical = self.shared.critical.lock();
        critical.bucket.has_capacity();
        critical.bucket.tokens()
    }

    /// The pause between drain passes.
    #[inline]
    pub fn drain_delay(&self) -> Duration {
        self.shared.drain_delay
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let critical = self.shared.critical.lock();

        f.debug_struct("RateLimiter")
            .field("bucket", &critical.bucket)
            .field("pending", &critical.pending.len())
            .field("draining", &critical.draining)
            .field("drain_delay", &self.shared.drain_delay)
            .finish()
    }
}

/// Handle to a unit of work passed to [`RateLimiter::schedule`].
pub struct Scheduled {
    shared: Arc<Shared>,
    /// Key into the pending list, if the work was deferred.
    key: Option<Key>,
}

impl Scheduled {
    /// Test if the work is still waiting to be admitted.
    pub fn is_pending(&self) -> bool {
        match self.key {
            Some(key) => self.shared.critical.lock().pending.contains(key),
            None => false,
        }
    }

    /// Remove the work from the pending list so that it never runs.
    ///
    /// Returns `true` if the work was still pending, and `false` if it has
    /// already been released.
    pub fn cancel(&self) -> bool {
        let Some(key) = self.key else {
            return false;
        };

        // Dropped outside of the critical section, the closure might own
        // things which take locks when dropped.
        let work = self.shared.critical.lock().pending.remove(key);
        work.is_some()
    }
}

impl fmt::Debug for Scheduled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduled")
            .field("pending", &self.is_pending())
            .finish()
    }
}
