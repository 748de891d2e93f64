//! Task-local tracking of which queues the current task is executing inside
//! of.
//!
//! Every operation chained on a [`SerialQueue`] runs inside a scope which
//! pushes a [`Frame`] for that queue. Nested scopes link to their parent, so
//! an operation running in queue `A` which performs on queue `B` which in turn
//! performs on `A` again still sees `A` as an enclosing queue.
//!
//! [`SerialQueue`]: crate::SerialQueue

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::latch::CancelToken;

tokio::task_local! {
    static CURRENT: Arc<Frame>;
}

/// Unique identity of a queue instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u64);

impl QueueId {
    /// Mint a fresh identity.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct Frame {
    queue: QueueId,
    token: CancelToken,
    parent: Option<Arc<Frame>>,
}

/// Find the token of the innermost operation of `queue` that encloses the
/// current task, if any.
pub(crate) fn enclosing(queue: QueueId) -> Option<CancelToken> {
    CURRENT
        .try_with(|frame| {
            let mut current = Some(frame);

            while let Some(frame) = current {
                if frame.queue == queue {
                    return Some(frame.token.clone());
                }

                current = frame.parent.as_ref();
            }

            None
        })
        .ok()
        .flatten()
}

/// The innermost frame of the current task.
///
/// Task-locals don't follow spawned tasks, so this is captured where an
/// operation is submitted and handed to [`scope`] where it runs.
pub(crate) fn current() -> Option<Arc<Frame>> {
    CURRENT.try_with(Arc::clone).ok()
}

/// Run `future` inside of an operation belonging to `queue`, nested in
/// `parent`.
pub(crate) fn scope<F>(
    queue: QueueId,
    token: CancelToken,
    parent: Option<Arc<Frame>>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let frame = Arc::new(Frame {
        queue,
        token,
        parent,
    });

    CURRENT.scope(frame, future)
}

#[cfg(test)]
mod tests {
    use super::{current, enclosing, scope, QueueId};
    use crate::latch::CancelToken;

    #[tokio::test]
    async fn nested_scopes_are_visible() {
        let a = QueueId::next();
        let b = QueueId::next();
        let outer = CancelToken::new();
        let inner = CancelToken::new();

        assert!(enclosing(a).is_none());
        assert!(current().is_none());

        scope(a, outer.clone(), None, async {
            assert!(enclosing(a).is_some_and(|t| t.same(&outer)));
            assert!(enclosing(b).is_none());

            scope(b, inner.clone(), current(), async {
                assert!(enclosing(a).is_some_and(|t| t.same(&outer)));
                assert!(enclosing(b).is_some_and(|t| t.same(&inner)));
            })
            .await;

            assert!(enclosing(b).is_none());
        })
        .await;

        assert!(enclosing(a).is_none());
    }

    #[tokio::test]
    async fn frames_follow_explicitly_into_spawned_tasks() {
        let a = QueueId::next();
        let b = QueueId::next();
        let token = CancelToken::new();

        let seen = scope(a, token.clone(), None, async move {
            let parent = current();

            tokio::spawn(async move {
                let lost = enclosing(a).is_none();
                let kept = scope(b, CancelToken::new(), parent, async move { enclosing(a) }).await;
                (lost, kept)
            })
            .await
        })
        .await
        .unwrap();

        assert!(seen.0);
        assert!(seen.1.is_some_and(|t| t.same(&token)));
    }

    #[test]
    fn identities_are_unique() {
        assert_ne!(QueueId::next(), QueueId::next());
    }
}
