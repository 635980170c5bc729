use crate::endpoint::EndpointError;

/// Build-level error. Recoverable per-point events (out-of-bounds points,
/// overflow past the cold depth) are never errors; they accumulate in
/// `PointStats` instead.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Bad user input: unreadable source, empty bounds, invalid subset, ...
    #[error("invalid input: {0}")]
    Input(String),

    /// Invalid build configuration, rejected before any work starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A stored blob failed validation on read.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Subset merge violated the adjacency protocol.
    #[error("merge failure: {0}")]
    Merge(String),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    pub fn input(msg: impl Into<String>) -> Self {
        IndexError::Input(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        IndexError::Config(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        IndexError::Corrupt(msg.into())
    }
}
