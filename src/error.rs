use thiserror::Error;

use crate::layers::interface::ConnectionType;

pub type Result<T> = std::result::Result<T, LayerError>;

/// 层构建与执行过程中的错误。
///
/// 配置错误在构建时立即返回；能力错误在调用时返回；调用顺序错误以 `NotAvailable` 报告。
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("shape mismatch: expected {expected}, found {found} ({context})")]
    ShapeMismatch {
        expected: usize,
        found: usize,
        context: &'static str,
    },

    #[error("connection type {0:?} requires a context window")]
    MissingContextWindow(ConnectionType),

    #[error("layer index {index} out of range (stack has {len} layers)")]
    LayerIndexOutOfRange { index: usize, len: usize },

    #[error("relevance not supported by {0:?} layers")]
    RelevanceNotSupported(ConnectionType),

    #[error("no initial hidden state was set for layer {0}")]
    MissingInitHidden(usize),

    #[error("{0} not available: the pass that produces it has not run")]
    NotAvailable(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub fn configuration(m: impl Into<String>) -> LayerError {
    LayerError::InvalidConfiguration(m.into())
}

pub fn argument(m: impl Into<String>) -> LayerError {
    LayerError::InvalidArgument(m.into())
}

/// 尺寸不一致时返回 `ShapeMismatch`。
pub fn ensure_size(expected: usize, found: usize, context: &'static str) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(LayerError::ShapeMismatch {
            expected,
            found,
            context,
        })
    }
}
