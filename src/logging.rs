use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use crate::util::env::env_flag;

/// Default filter for the sync binary: pipeline at info, sqlx statement logs muted.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Colour is disabled when `NO_COLOR` is set,
/// which keeps scheduler-captured logs free of escape codes.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_ansi(!env_flag("NO_COLOR", false))
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
