use thiserror::Error;

/// Errors from input injection.
#[derive(Debug, Error)]
pub enum InputError {
    /// The injection utility could not be spawned.
    #[error("Failed to run {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The injection utility exited with a failure status.
    #[error("{action} failed ({status}): {stderr}")]
    Injection {
        action: &'static str,
        status: String,
        stderr: String,
    },

    /// The device class is disabled by configuration.
    #[error("{0} input is disabled")]
    Disabled(&'static str),
}
