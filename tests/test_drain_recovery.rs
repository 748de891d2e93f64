use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use task_tamer::RateLimiter;
use tokio::time::{self, Duration};

fn counter(count: &Arc<AtomicUsize>) -> impl FnOnce() -> bool + Send + 'static {
    let count = count.clone();

    move || {
        count.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// A panic in deferred work doesn't take down the drain loop, neither for the
/// work already pending behind it nor for work scheduled later.
#[tokio::test(start_paused = true)]
async fn test_drain_survives_panicking_work() {
    let limiter = RateLimiter::builder().rate(100.0).burst(1.0).build();
    let count = Arc::new(AtomicUsize::new(0));

    assert!(!limiter.schedule(|| true).is_pending());
    assert!(limiter.schedule(|| panic!("deferred work failed")).is_pending());
    limiter.schedule(counter(&count));

    time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(limiter.pending(), 0);
    assert!(!limiter.is_draining());

    limiter.schedule(counter(&count));
    limiter.schedule(counter(&count));

    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(limiter.pending(), 0);
    assert!(!limiter.is_draining());
}

/// Work deferred outside of a runtime stays pending without wedging the
/// limiter, and is released once work is deferred from inside of one.
#[tokio::test(start_paused = true)]
async fn test_deferred_outside_runtime() {
    let limiter = RateLimiter::builder().rate(100.0).burst(1.0).build();
    let count = Arc::new(AtomicUsize::new(0));

    std::thread::spawn({
        let limiter = limiter.clone();
        let count = count.clone();

        move || {
            assert!(!limiter.schedule(counter(&count)).is_pending());
            assert!(limiter.schedule(counter(&count)).is_pending());
        }
    })
    .join()
    .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(limiter.pending(), 1);
    assert!(!limiter.is_draining());

    assert!(limiter.schedule(counter(&count)).is_pending());
    assert!(limiter.is_draining());

    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(limiter.pending(), 0);
    assert!(!limiter.is_draining());
}

/// Shutting down the runtime a drain loop runs on marks the limiter as no
/// longer draining, so a later runtime picks the pending work up.
#[test]
fn test_drain_torn_down_with_runtime() -> anyhow::Result<()> {
    let limiter = RateLimiter::builder().rate(100.0).burst(1.0).build();
    let count = Arc::new(AtomicUsize::new(0));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    runtime.block_on(async {
        limiter.schedule(counter(&count));
        limiter.schedule(counter(&count));
    });

    assert!(limiter.is_draining());
    drop(runtime);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(limiter.pending(), 1);
    assert!(!limiter.is_draining());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    runtime.block_on(async {
        limiter.schedule(counter(&count));

        while limiter.is_draining() {
            time::sleep(Duration::from_millis(5)).await;
        }
    });

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(limiter.pending(), 0);
    Ok(())
}
