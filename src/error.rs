use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] globset::Error),

    #[error("Cache encode error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Invalid glob {glob:?}: {reason}")]
    GlobParse { glob: String, reason: String },

    #[error("Recursive globs (**) are not supported: {0}")]
    UnsupportedGlob(String),

    #[error("Home directory not found")]
    HomeDirNotFound,
}
