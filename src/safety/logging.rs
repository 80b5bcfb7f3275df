use std::io;

use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, fmt};

/// Stdout logging at INFO, overridable through `RUST_LOG`. The returned guard
/// keeps the subscriber installed for the current thread.
pub fn init_std_out_logging() -> DefaultGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let collector = tracing_subscriber::registry()
        .with(fmt::Layer::new().with_writer(io::stdout).with_filter(filter));
    tracing::subscriber::set_default(collector)
}
