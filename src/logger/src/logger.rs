use env_logger::Env;

/// Initialize logging for the process.
///
/// Log level is controlled via the FLUX_LOG environment variable
/// (falls back to "info" when unset).
pub fn setup_logging() {
    env_logger::Builder::from_env(Env::new().filter_or("FLUX_LOG", "info"))
        .format_timestamp_millis()
        .init();
}
