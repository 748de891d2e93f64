use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use parking_lot::Mutex;
use pin_project_lite::pin_project;

use crate::context::{self, QueueId};
use crate::error::Error;
use crate::gate::{Gate, ResultCell};
use crate::latch::{CancelToken, Latch};

/// How a newly submitted operation relates to the one submitted before it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Policy {
    /// Cancel the previous operation and start right away. Only the most
    /// recently submitted operation is guaranteed to run to completion.
    CancelPrevious,
    /// Wait for the previous operation to finish, whatever its outcome, before
    /// starting. Operations run strictly in submission order.
    #[default]
    WaitOnPrevious,
}

/// Handle to a chained operation.
#[derive(Clone)]
struct Link {
    token: CancelToken,
    done: Arc<Latch>,
}

impl Link {
    fn new() -> Self {
        Self {
            token: CancelToken::new(),
            done: Arc::new(Latch::new()),
        }
    }
}

struct Shared {
    id: QueueId,
    policy: Policy,
    /// The most recently chained operation, if it is still alive.
    last: Mutex<Option<Link>>,
}

/// Releases the next operation in the chain once the current one is done, or
/// once its task has been torn down.
struct Finish {
    shared: Arc<Shared>,
    link: Link,
}

impl Drop for Finish {
    fn drop(&mut self) {
        self.link.done.set();

        let mut last = self.shared.last.lock();

        // Don't hold on to completed work.
        if last
            .as_ref()
            .is_some_and(|last| last.token.same(&self.link.token))
        {
            *last = None;
        }
    }
}

/// Shared state between a pending [`Perform`] and the chained operation
/// it is waiting for.
///
/// The cell holds `None` if the operation was cancelled.
struct Reply<R> {
    gate: Gate,
    cell: ResultCell<Option<R>>,
    abandoned: AtomicBool,
}

impl<R> Reply<R> {
    fn new() -> Self {
        Self {
            gate: Gate::closed(),
            cell: ResultCell::empty(),
            abandoned: AtomicBool::new(false),
        }
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

/// The sending half of a [`Reply`] held by the chained operation.
///
/// Dropping it without sending resolves the waiting caller with a
/// cancellation.
struct Sender<R> {
    reply: Arc<Reply<R>>,
}

impl<R> Sender<R> {
    fn send(&self, outcome: Option<R>) {
        if self.reply.cell.put(outcome) {
            self.reply.gate.open();
        }
    }
}

impl<R> Drop for Sender<R> {
    fn drop(&mut self) {
        self.send(None);
    }
}

/// The receiving half of a [`Reply`] held by [`Perform`].
struct Receiver<R> {
    reply: Arc<Reply<R>>,
}

impl<R> Drop for Receiver<R> {
    fn drop(&mut self) {
        self.reply.abandoned.store(true, Ordering::Release);
    }
}

pin_project! {
    #[project = StateProj]
    enum State<Fut>
    where
        Fut: Future,
    {
        Inline {
            #[pin]
            future: Fut,
        },
        Waiting {
            receiver: Receiver<Fut::Output>,
        },
    }
}

pin_project! {
    /// Future returned by [`SerialQueue::perform`].
    ///
    /// The operation is chained when `perform` is called, not when this is
    /// first polled. Dropping it before it resolves abandons the request: if
    /// the operation has not started yet it never will.
    #[must_use = "the result of the operation is only observed by awaiting it"]
    pub struct Perform<Fut>
    where
        Fut: Future,
    {
        #[pin]
        state: State<Fut>,
    }
}

impl<Fut, T, E> Future for Perform<Fut>
where
    Fut: Future<Output = Result<T, E>>,
{
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().state.project() {
            StateProj::Inline { future } => {
                let output = ready!(future.poll(cx));
                Poll::Ready(output.map_err(Error::Failed))
            }
            StateProj::Waiting { receiver } => {
                ready!(receiver.reply.gate.poll_wait(cx));

                Poll::Ready(match receiver.reply.cell.take().flatten() {
                    Some(Ok(value)) => Ok(value),
                    Some(Err(error)) => Err(Error::Failed(error)),
                    None => Err(Error::Cancelled),
                })
            }
        }
    }
}

impl<Fut> fmt::Debug for Perform<Fut>
where
    Fut: Future,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Inline { .. } => "Inline",
            State::Waiting { .. } => "Waiting",
        };

        f.debug_struct("Perform").field("state", &state).finish()
    }
}

/// A queue which serializes asynchronous operations submitted from arbitrary
/// call sites.
///
/// Each submitted operation is chained after the one submitted before it
/// according to the queue's [`Policy`], and runs on the Tokio runtime it was
/// submitted from. Every operation receives a [`CancelToken`] which fires if
/// it is superseded under [`Policy::CancelPrevious`] or through
/// [`cancel_all`].
///
/// Cloning the queue gives another handle to the same queue.
///
/// [`cancel_all`]: SerialQueue::cancel_all
///
/// # Reentrancy
///
/// Calling [`perform`] from inside an operation which is already running on
/// the same queue runs the nested operation inline. Chaining it would make it
/// wait for the very operation which is waiting for it.
///
/// [`perform`]: SerialQueue::perform
///
/// # Examples
///
/// ```
/// use task_tamer::SerialQueue;
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let queue = SerialQueue::default();
///
/// let a = queue.perform(|_| async { Ok::<_, std::io::Error>("first") });
/// let b = queue.perform(|_| async { Ok::<_, std::io::Error>("second") });
///
/// assert_eq!(a.await.unwrap(), "first");
/// assert_eq!(b.await.unwrap(), "second");
/// # }
/// ```
#[derive(Clone)]
pub struct SerialQueue {
    shared: Arc<Shared>,
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

impl SerialQueue {
    /// Construct a new queue with the given policy.
    pub fn new(policy: Policy) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: QueueId::next(),
                policy,
                last: Mutex::new(None),
            }),
        }
    }

    /// The policy of this queue.
    #[inline]
    pub fn policy(&self) -> Policy {
        self.shared.policy
    }

    /// The unique identity of this queue.
    #[inline]
    pub fn id(&self) -> QueueId {
        self.shared.id
    }

    /// Submit an operation without waiting for it.
    ///
    /// The outcome of the operation is discarded, including its error. Use
    /// [`perform`] if you need it.
    ///
    /// If called from inside an operation of this queue, the new operation is
    /// chained to run once the current one is done, regardless of policy.
    ///
    /// [`perform`]: SerialQueue::perform
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn submit<F, Fut, T, E>(&self, op: F)
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let policy = match context::enclosing(self.shared.id) {
            Some(..) => Policy::WaitOnPrevious,
            None => self.shared.policy,
        };

        self.chain(policy, op, None);
    }

    /// Submit an operation and return a future which resolves to its outcome.
    ///
    /// Resolves to [`Error::Failed`] if the operation itself failed, and to
    /// [`Error::Cancelled`] if it was cancelled before it could start, or
    /// cancelled while it ran and still completed successfully.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime, unless the call is
    /// reentrant.
    pub fn perform<F, Fut, T, E>(&self, op: F) -> Perform<Fut>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        if let Some(token) = context::enclosing(self.shared.id) {
            trace!(queue = ?self.shared.id, "running reentrant operation inline");

            return Perform {
                state: State::Inline { future: op(token) },
            };
        }

        let reply = Arc::new(Reply::new());

        self.chain(
            self.shared.policy,
            op,
            Some(Sender {
                reply: reply.clone(),
            }),
        );

        Perform {
            state: State::Waiting {
                receiver: Receiver { reply },
            },
        }
    }

    /// Cancel the most recently chained operation, and through it whatever
    /// it is still waiting on.
    ///
    /// Operations submitted afterwards are unaffected.
    pub fn cancel_all(&self) {
        if let Some(last) = &*self.shared.last.lock() {
            if last.token.cancel() {
                trace!(queue = ?self.shared.id, "cancelled last operation");
            }
        }
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", skip_all, fields(queue = ?self.shared.id, policy = ?policy))
    )]
    fn chain<F, Fut, T, E>(&self, policy: Policy, op: F, sender: Option<Sender<Result<T, E>>>)
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        // Waiting on ourselves from inside our own chain never resolves.
        debug_assert!(
            sender.is_none() || context::enclosing(self.shared.id).is_none(),
            "reentrant perform must run inline"
        );

        let link = Link::new();
        let token = link.token.clone();
        let previous = self.shared.last.lock().replace(link.clone());

        // A caller waiting on the outcome is blocked on this operation, so
        // whatever queues it runs inside of are also held up by it.
        let parent = match &sender {
            Some(..) => context::current(),
            None => None,
        };

        let id = self.shared.id;

        trace!(
            queue = ?id,
            ?policy,
            has_previous = previous.is_some(),
            "chaining operation"
        );

        // Superseded work is cancelled at submission, so it can't slip in a
        // success before the new operation gets scheduled.
        let previous = match (policy, previous) {
            (Policy::CancelPrevious, Some(previous)) => {
                if previous.token.cancel() {
                    trace!(queue = ?id, "cancelled previous operation");
                }

                None
            }
            (_, previous) => previous,
        };

        let finish = Finish {
            shared: self.shared.clone(),
            link,
        };

        tokio::spawn(async move {
            let _finish = finish;

            if let Some(previous) = previous {
                tokio::select! {
                    _ = previous.done.wait() => {}
                    _ = token.cancelled() => {
                        // Forward to what we're waiting on, but keep waiting so
                        // the chain stays serialized.
                        previous.token.cancel();
                        previous.done.wait().await;
                    }
                }
            }

            let abandoned = sender
                .as_ref()
                .is_some_and(|sender| sender.reply.is_abandoned());

            if token.is_cancelled() || abandoned {
                trace!(queue = ?id, abandoned, "skipping cancelled operation");
                return;
            }

            let result = context::scope(id, token.clone(), parent, {
                let token = token.clone();
                async move { op(token).await }
            })
            .await;

            match sender {
                Some(sender) => {
                    let outcome = match result {
                        Ok(..) if token.is_cancelled() => None,
                        result => Some(result),
                    };

                    sender.send(outcome);
                }
                None => {
                    if result.is_err() {
                        trace!(queue = ?id, "dropped error of submitted operation");
                    }
                }
            }
        });
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("id", &self.shared.id)
            .field("policy", &self.shared.policy)
            .field("busy", &self.shared.last.lock().is_some())
            .finish()
    }
}
