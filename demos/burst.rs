use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use task_tamer::RateLimiter;
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> Result<()> {
    helpers::init_logging();

    let limiter = RateLimiter::new(80.0, 25.0);
    let done = Arc::new(Notify::new());
    let start = Instant::now();

    println!("drain delay: {:?}", limiter.drain_delay());

    for n in 0..100 {
        let done = done.clone();

        limiter.schedule(move || {
            println!("tick: {n} at {:?}", start.elapsed());

            if n == 99 {
                done.notify_one();
            }

            true
        });
    }

    tokio::time::timeout(Duration::from_secs(5), done.notified()).await?;

    // 25 back to back, the remaining 75 at 80 per second.
    println!("released 100 in {:?}", start.elapsed());
    Ok(())
}
