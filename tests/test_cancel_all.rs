use std::io;

use task_tamer::{Error, SerialQueue};
use tokio::sync::oneshot;
use tokio::time::{self, Duration};

/// Cancelling the last operation reaches the running one it is waiting on.
#[tokio::test(start_paused = true)]
async fn test_cancel_all_is_transitive() -> anyhow::Result<()> {
    let queue = SerialQueue::default();
    let (started_tx, started_rx) = oneshot::channel();

    let running = tokio::spawn(queue.perform(move |token| async move {
        let _ = started_tx.send(());
        token.cancelled().await;
        Err::<(), _>(io::Error::new(io::ErrorKind::Interrupted, "cancelled"))
    }));

    started_rx.await?;

    let waiting = tokio::spawn(queue.perform(|_| async { Ok::<_, io::Error>("never") }));

    // Give the waiting operation a chance to start waiting.
    time::sleep(Duration::from_millis(10)).await;
    queue.cancel_all();

    let error = running.await?.unwrap_err();
    assert_eq!(
        error.into_failed().map(|e| e.kind()),
        Some(io::ErrorKind::Interrupted)
    );

    assert!(matches!(waiting.await?, Err(Error::Cancelled)));

    // Later submissions are unaffected.
    let after = queue.perform(|token| async move { Ok::<_, io::Error>(token.is_cancelled()) });
    assert!(!after.await?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_when_idle() -> anyhow::Result<()> {
    let queue = SerialQueue::default();

    queue.cancel_all();
    assert_eq!(queue.perform(|_| async { Ok::<_, io::Error>(1) }).await?, 1);

    // Completed work is not retained, so there's nothing left to cancel.
    queue.cancel_all();
    assert_eq!(queue.perform(|_| async { Ok::<_, io::Error>(2) }).await?, 2);
    Ok(())
}
