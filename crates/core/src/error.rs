#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid broker target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },
}
