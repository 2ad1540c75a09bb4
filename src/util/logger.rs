use log::SetLoggerError;

/// Attempt to init a env_logger for the JVMCI runtime.
/// Does nothing if the "builtin_env_logger" feature is disabled.
///
/// The embedding VM may disable the feature and register its own `log` implementation, for
/// example one that forwards to the VM's unified logging.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}
