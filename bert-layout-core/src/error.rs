//! Error types for the BERT-layout run harness.
//!
//! Uses `thiserror` for structured error variants covering configuration,
//! dispatch, and trainer/backend domains.

use std::path::PathBuf;

/// Top-level error type for the harness library.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Trainer failures pass through with their own message.
    #[error(transparent)]
    Trainer(#[from] TrainerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LayoutError {
    /// Process exit code for this error.
    ///
    /// 2 for configuration errors, 3 for unsupported model or mode,
    /// 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Dispatch(DispatchError::UnsupportedModel { .. })
            | Self::Dispatch(DispatchError::UnsupportedMode { .. }) => 3,
            _ => 1,
        }
    }
}

/// Errors from building or loading an experiment configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unknown experiment family: {name}")]
    UnknownFamily { name: String },

    #[error("Invalid value '{value}' for '{field}', expected one of: {}", .expected.join(", "))]
    UnknownVariant {
        field: String,
        value: String,
        expected: Vec<String>,
    },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Value {value} for '{field}' violates constraint: {constraint}")]
    OutOfRange {
        field: String,
        value: String,
        constraint: String,
    },

    #[error("Invalid override '{raw}': expected key=value")]
    InvalidOverride { raw: String },

    #[error("Configuration parse error: {message}")]
    Parse { message: String },
}

/// Errors from trainer selection and mode dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Model class '{model_class}' is not implemented")]
    UnsupportedModel { model_class: String },

    #[error("Mode '{mode}' is not supported (expected 'train' or 'test')")]
    UnsupportedMode { mode: String },

    #[error("Trainer already registered for model class '{model_class}'")]
    DuplicateTrainer { model_class: String },

    #[error("Dispatcher already ran (state: {state})")]
    AlreadyStarted { state: String },
}

/// Errors raised by trainers and the numeric backend they drive.
#[derive(Debug, thiserror::Error)]
pub enum TrainerError {
    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Checkpoint error: {message}")]
    Checkpoint { message: String },

    #[error("Sampling for index {idx} returned no {what}")]
    EmptySample { idx: u64, what: &'static str },

    #[error("Refinement schedule {iterative_nums:?} exceeds the step budget")]
    ScheduleOverflow { iterative_nums: Vec<u32> },

    #[error("Non-finite loss at step {step}")]
    NonFiniteLoss { step: u64 },

    #[error("Trainer IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trainer serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrainerError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: msg.into(),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = LayoutError> = std::result::Result<T, E>;
