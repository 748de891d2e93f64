use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A one-way flag which any number of tasks can wait on.
///
/// Once set it stays set. Backs both cancellation tokens and the completion
/// signal of chained operations.
#[derive(Default)]
pub(crate) struct Latch {
    set: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set the latch, waking every waiter.
    ///
    /// Returns `true` if this call was the one to set it.
    pub(crate) fn set(&self) -> bool {
        if self.set.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.notify.notify_waiters();
        true
    }

    pub(crate) fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Wait until the latch is set.
    pub(crate) async fn wait(&self) {
        loop {
            // A `Notified` observes `notify_waiters` calls made after it was
            // constructed, so checking the flag after this is race free.
            let notified = self.notify.notified();

            if self.is_set() {
                return;
            }

            notified.await;
        }
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Cooperative cancellation token handed to every operation run by a
/// [`SerialQueue`].
///
/// The queue only ever *requests* cancellation. A long running operation is
/// expected to check [`is_cancelled`] at convenient points, or race its work
/// against [`cancelled`], and bail out early.
///
/// [`SerialQueue`]: crate::SerialQueue
/// [`is_cancelled`]: CancelToken::is_cancelled
/// [`cancelled`]: CancelToken::cancelled
///
/// # Examples
///
/// ```
/// use task_tamer::{Policy, SerialQueue};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let queue = SerialQueue::new(Policy::CancelPrevious);
///
/// let first = queue.perform(|token| async move {
///     tokio::select! {
///         _ = token.cancelled() => Err("superseded"),
///         _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(1),
///     }
/// });
///
/// let second = queue.perform(|_| async { Ok::<_, &str>(2) });
///
/// assert!(first.await.is_err());
/// assert_eq!(second.await.ok(), Some(2));
/// # }
/// ```
#[derive(Clone)]
pub struct CancelToken {
    latch: Arc<Latch>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self {
            latch: Arc::new(Latch::new()),
        }
    }

    /// Request cancellation. Returns `true` if the token was not already
    /// cancelled.
    pub(crate) fn cancel(&self) -> bool {
        self.latch.set()
    }

    /// Test if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.latch.is_set()
    }

    /// Wait until cancellation has been requested.
    ///
    /// Resolves immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        self.latch.wait().await
    }

    pub(crate) fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.latch, &other.latch)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
