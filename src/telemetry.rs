use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber for a binary.
///
/// `RUST_LOG` wins over `default_directive`. Calling this twice is harmless.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
