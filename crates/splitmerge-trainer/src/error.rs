use thiserror::Error;

/// Errors raised before training starts.
#[derive(Debug, Error)]
pub enum TrainerError {
    /// The training configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A treebank yielded no trees after filtering.
    #[error("empty treebank: {0}")]
    EmptyTreebank(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = TrainerError::InvalidConfig("output path is required".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: output path is required"
        );

        let err = TrainerError::EmptyTreebank("train.mrg".into());
        assert_eq!(err.to_string(), "empty treebank: train.mrg");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TrainerError>();
    }
}
