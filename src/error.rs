/// Result alias for engine-level operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can abort startup or a configuration apply.
///
/// Runtime faults (pattern timeouts, sink hiccups, malformed packets)
/// never surface here; they are counted and flagged through
/// [`crate::stats::Stats`] and the render loop keeps going.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration document or CLI arguments are unusable. The
    /// previously active configuration, if any, stays in effect.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// An output device could not be opened.
    #[error("hardware open failed: {0}")]
    Hardware(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit code for this error, per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) => 1,
            EngineError::Hardware(_) | EngineError::Io(_) => 2,
        }
    }
}
