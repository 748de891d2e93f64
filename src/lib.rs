#![deny(missing_docs)]
//! Two primitives for taming unbounded asynchronous work on [Tokio].
//!
//! * [SerialQueue] imposes an order on asynchronous operations submitted from
//!   arbitrary call sites. Under [Policy::WaitOnPrevious] every operation waits
//!   for the one submitted before it, under [Policy::CancelPrevious] every
//!   operation supersedes the one before it.
//! * [RateLimiter] smooths bursts of work against a long-run rate using a
//!   [token bucket]. Work within the burst runs with zero delay, anything
//!   beyond it is released in FIFO order as the bucket refills.
//!
//! Each instance is independent; there is no coordination or fairness across
//! instances.
//!
//! ## Usage
//!
//! Add the following to your `Cargo.toml`:
//!
//! ```toml
//! task-tamer = "0.1.0"
//! ```
//!
//! Enable the `tracing` feature to have the queue and the limiter emit
//! trace-level events through [tracing].
//!
//! ## Serializing operations
//!
//! Operations are closures which receive a [CancelToken] and return a future
//! producing a `Result`. [SerialQueue::submit] fires and forgets, while
//! [SerialQueue::perform] resolves to the outcome of the operation.
//!
//! ```
//! use task_tamer::{Error, Policy, SerialQueue};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let queue = SerialQueue::new(Policy::WaitOnPrevious);
//!
//! // Submitted first, so it runs first even though it takes the longest.
//! queue.submit(|_| async {
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     Ok::<_, std::io::Error>(())
//! });
//!
//! let outcome = queue.perform(|_| async { Err::<(), _>("no such thing") }).await;
//! assert!(matches!(outcome, Err(Error::Failed("no such thing"))));
//! # }
//! ```
//!
//! ## Smoothing bursts
//!
//! ```
//! use task_tamer::RateLimiter;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! // 80 units of work per second, of which 25 can run back to back.
//! let limiter = RateLimiter::default();
//!
//! for n in 0..30 {
//!     limiter.schedule(move || {
//!         println!("released {n}");
//!         true
//!     });
//! }
//!
//! assert_eq!(limiter.pending(), 5);
//! # }
//! ```
//!
//! [Tokio]: https://docs.rs/tokio
//! [tracing]: https://docs.rs/tracing
//! [token bucket]: https://en.wikipedia.org/wiki/Token_bucket

#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

mod bucket;
mod context;
mod error;
mod gate;
mod latch;
mod limiter;
mod linked_list;
mod queue;

pub use self::bucket::TokenBucket;
pub use self::context::QueueId;
pub use self::error::Error;
pub use self::latch::CancelToken;
pub use self::limiter::{drain_delay, Builder, RateLimiter, Scheduled, DEFAULT_BURST, DEFAULT_RATE};
pub use self::queue::{Perform, Policy, SerialQueue};
