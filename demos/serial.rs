use std::io;
use std::time::Duration;

use anyhow::Result;
use task_tamer::{Policy, SerialQueue};

#[tokio::main]
async fn main() -> Result<()> {
    helpers::init_logging();

    let queue = SerialQueue::new(Policy::WaitOnPrevious);

    for n in 0..5u64 {
        queue.submit(move |_| async move {
            // Later submissions sleep less, but still finish in order.
            tokio::time::sleep(Duration::from_millis(250 - n * 50)).await;
            println!("submitted #{n} done");
            Ok::<_, io::Error>(())
        });
    }

    let answer = queue
        .perform(|_| async { Ok::<_, io::Error>(42) })
        .await?;

    println!("performed: {answer}");

    let latest = SerialQueue::new(Policy::CancelPrevious);

    let searches = ["r", "ru", "rus", "rust"].map(|query| {
        latest.perform(move |token| async move {
            tokio::select! {
                _ = token.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, query)),
                _ = tokio::time::sleep(Duration::from_millis(100)) => Ok(format!("results for {query:?}")),
            }
        })
    });

    for search in searches {
        match search.await {
            Ok(results) => println!("{results}"),
            Err(error) => println!("superseded: {error}"),
        }
    }

    Ok(())
}
