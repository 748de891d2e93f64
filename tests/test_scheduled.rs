use std::sync::{Arc, Mutex};

use task_tamer::RateLimiter;
use tokio::sync::oneshot;
use tokio::time::{self, Duration};

#[tokio::test(start_paused = true)]
async fn test_cancel_pending() {
    let limiter = RateLimiter::builder().rate(10.0).burst(1.0).build();
    let log = Arc::new(Mutex::new(Vec::new()));

    let push = |c: char| {
        let log = log.clone();

        move || {
            log.lock().unwrap().push(c);
            true
        }
    };

    let a = limiter.schedule(push('a'));
    let b = limiter.schedule(push('b'));
    let c = limiter.schedule(push('c'));
    let d = limiter.schedule(push('d'));

    assert!(!a.is_pending());
    assert!(!a.cancel());

    assert!(c.is_pending());
    assert!(c.cancel());
    assert!(!c.cancel());
    assert!(!c.is_pending());
    assert_eq!(limiter.pending(), 2);

    time::sleep(Duration::from_secs(1)).await;

    assert!(!b.is_pending() && !d.is_pending());
    assert!(!b.cancel());
    assert_eq!(*log.lock().unwrap(), ['a', 'b', 'd']);
    assert!(!limiter.is_draining());
}

/// Cancelling everything that is pending lets the drain loop wind down.
#[tokio::test(start_paused = true)]
async fn test_cancel_all_pending() {
    let limiter = RateLimiter::builder().rate(10.0).burst(1.0).build();

    limiter.schedule(|| true);

    let pending = (0..5).map(|_| limiter.schedule(|| true)).collect::<Vec<_>>();

    for scheduled in &pending {
        assert!(scheduled.cancel());
    }

    assert_eq!(limiter.pending(), 0);
    time::sleep(Duration::from_millis(200)).await;
    assert!(!limiter.is_draining());
}

#[tokio::test(start_paused = true)]
async fn test_schedule_async() -> anyhow::Result<()> {
    let limiter = RateLimiter::builder().rate(10.0).burst(1.0).build();

    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();

    limiter.schedule_async(move || async move {
        let _ = first_tx.send(1);
    });

    let second = limiter.schedule_async(move || async move {
        let _ = second_tx.send(2);
    });

    assert!(second.is_pending());
    assert_eq!(first_rx.await?, 1);
    assert_eq!(second_rx.await?, 2);
    Ok(())
}
