use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`,
/// defaulting to `info`. Intended for binaries and examples; library code
/// never initializes a subscriber itself.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
