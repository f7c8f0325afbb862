//! Error taxonomy shared by every pipeline stage
//!
//! Stages return `Result<_, PipelineError>` so callers can branch on the
//! failure class without string matching. The CLI converts these into the
//! `{success:false, error}` record it prints on stdout.

use thiserror::Error;

/// Model output that could not be turned into JSON, even after repair.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    /// Error from the first, unrepaired parse attempt (if one was made)
    pub original_error: Option<String>,
    /// Error from the parse attempt after truncation repair (if one was made)
    pub repair_error: Option<String>,
    /// Bounded prefix of the raw response for diagnosis
    pub excerpt: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            original_error: None,
            repair_error: None,
            excerpt: excerpt.into(),
        }
    }

    /// Full diagnostic text including both parse errors and the excerpt.
    pub fn detail(&self) -> String {
        let mut out = self.message.clone();
        if let Some(err) = &self.original_error {
            out.push_str(&format!("\nOriginal error: {}", err));
        }
        if let Some(err) = &self.repair_error {
            out.push_str(&format!("\nRepair error: {}", err));
        }
        if !self.excerpt.is_empty() {
            out.push_str(&format!("\nFirst 300 chars: {}", self.excerpt));
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Parse error: {}", .0.detail())]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Scout error: {0}")]
    Scout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation(message.into())
    }

    pub fn scout(message: impl Into<String>) -> Self {
        PipelineError::Scout(message.into())
    }

    /// Short machine-friendly name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Parse(_) => "parse",
            PipelineError::Validation(_) => "validation",
            PipelineError::Scout(_) => "scout",
            PipelineError::Network(_) => "network",
            PipelineError::Structural(_) => "structural",
            PipelineError::Config(_) => "config",
            PipelineError::Io(_) => "io",
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Network(format!("Request timed out: {}", err))
        } else {
            PipelineError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
