use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set, so the demos show what the
/// queue and the limiter are doing out of the box.
const DEFAULT_DIRECTIVE: &str = "task_tamer=trace";

/// Initialize logging for a demo.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .compact(),
        )
        .init();
}
