use thiserror::Error;

/// Main error type for the CARBS optimizer
#[derive(Error, Debug)]
pub enum CbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Observation mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    ObservationMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Suggestion exhausted: no novel candidate found after {attempts} attempts")]
    SuggestionExhausted { attempts: usize },

    #[error("Surrogate model error: {0}")]
    Surrogate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CbError {
    /// True for errors raised while validating construction-time inputs.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for CARBS operations
pub type CbResult<T> = Result<T, CbError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CbError::Config(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CbError::Internal(format!($($arg)*))
    };
}
