use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading treebanks or manipulating grammars.
#[derive(Debug, Error)]
pub enum GrammarError {
    /// The bracketed treebank text is malformed.
    #[error("treebank syntax error at token {position}: {message}")]
    TreebankSyntax {
        /// Index of the offending token in the input.
        position: usize,
        /// What went wrong.
        message: String,
    },

    /// A tree mentions a category the vocabulary has never seen.
    #[error("unknown category: {0:?}")]
    UnknownCategory(String),

    /// A tree node and the model disagree on a category's substate count.
    #[error("substate mismatch for category {state}: tree has {tree}, model has {model}")]
    SubstateMismatch {
        /// Category id.
        state: usize,
        /// Substates allocated on the tree node.
        tree: usize,
        /// Substates the model carries.
        model: usize,
    },

    /// A tree has a shape the binarized model cannot score.
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// Filesystem IO error with the path involved.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        /// Underlying IO error.
        source: std::io::Error,
        /// Path associated with the failure.
        path: PathBuf,
    },

    /// Checkpoint (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A regex pattern failed to compile (should not happen with static patterns).
    #[error("regex compilation error: {0}")]
    RegexError(#[from] regex::Error),
}

impl GrammarError {
    /// Wraps an IO error together with the path that caused it.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

/// Result type alias for splitmerge core operations.
pub type Result<T> = std::result::Result<T, GrammarError>;
