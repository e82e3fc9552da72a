#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration for {key}: {message}")]
    Config { key: &'static str, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a [`CoreError::Validation`] from a list of violations.
    pub fn from_violations(violations: Vec<String>) -> Self {
        CoreError::Validation(violations.join("; "))
    }
}
