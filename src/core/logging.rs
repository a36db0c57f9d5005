use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Calling this more than once is a
/// no-op, so tests and embedding runtimes can both call it.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
