use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install a global `tracing` subscriber for the given logging settings.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `false` when a
/// global subscriber was already installed, which callers may ignore.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let fmt_layer = match config.format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        "full" => fmt::layer().boxed(),
        _ => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
