//! The hand-off used by [`SerialQueue::perform`] to pass the outcome of a
//! chained operation back to the caller.
//!
//! A [`Gate`] starts closed. The chained operation writes its outcome into a
//! [`ResultCell`] and then opens the gate; the caller waits on the gate and
//! reads the cell exactly once after it opened.
//!
//! [`SerialQueue::perform`]: crate::SerialQueue::perform

use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

struct GateState {
    /// Set by `open` and consumed by a successful wait.
    permit: bool,
    /// The task currently waiting for the gate to open.
    waker: Option<Waker>,
}

/// A binary, async-aware semaphore with a single waiter.
pub(crate) struct Gate {
    state: Mutex<GateState>,
}

impl Gate {
    /// Construct a gate in the closed state.
    pub(crate) const fn closed() -> Self {
        Self {
            state: Mutex::new(GateState {
                permit: false,
                waker: None,
            }),
        }
    }

    /// Open the gate, waking the waiter if there is one.
    pub(crate) fn open(&self) {
        let waker = {
            let mut state = self.state.lock();
            state.permit = true;
            state.waker.take()
        };

        // Wake outside of the critical section.
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Poll for the gate to open, consuming the permit once it has.
    pub(crate) fn poll_wait(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.lock();

        if state.permit {
            state.permit = false;
            state.waker = None;
            return Poll::Ready(());
        }

        match &mut state.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            waker => *waker = Some(cx.waker().clone()),
        }

        Poll::Pending
    }
}

/// A single slot which is written once and read once.
pub(crate) struct ResultCell<T> {
    slot: Mutex<Option<T>>,
}

impl<T> ResultCell<T> {
    pub(crate) const fn empty() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Store the value. Returns `false` if the cell was already written, in
    /// which case the new value is discarded.
    pub(crate) fn put(&self, value: T) -> bool {
        let mut slot = self.slot.lock();

        if slot.is_some() {
            return false;
        }

        *slot = Some(value);
        true
    }

    /// Take the stored value.
    pub(crate) fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }
}
