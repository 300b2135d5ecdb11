use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "spr_analysis=info";

/// Initializes console logging on stderr.
///
/// `RUST_LOG` overrides the default filter; `verbose` raises this crate to
/// debug. Stdout stays free for reports.
pub fn init_logging(verbose: bool) {
    let directive = if verbose { "spr_analysis=debug" } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}
