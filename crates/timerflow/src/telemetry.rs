use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` wins when set; otherwise
/// `default_directive` (e.g. `"info"`) applies. Calling it twice is a no-op.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
