use thiserror::Error;

/// Errors returned by [`crate::LoadHandle::join`].
#[derive(Debug, Error)]
pub enum LoadError<E> {
    /// A merge source failed; the buffer has been told with a `Failed` event.
    #[error("Merge source failed: {0}")]
    Source(#[source] E),

    /// The blocking worker panicked or was aborted.
    #[error("Load worker failed: {0}")]
    Worker(String),
}

/// Errors reading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
}
