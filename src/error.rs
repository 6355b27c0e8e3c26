//! Error types for the page comparison engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the page comparison engine
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before any session storage was created
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A single document could not be rasterized
    #[error("Unsupported format for {filename}: {reason}")]
    UnsupportedFormat { filename: String, reason: String },

    /// Session id unknown, expired or already cleared
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Diff computation exceeded its time bound
    #[error("Diff timed out after {0} seconds")]
    Timeout(u64),

    /// Session storage budget cannot hold the upload
    #[error("Storage exhausted: {requested} bytes requested, {available} available")]
    StorageExhausted { requested: u64, available: u64 },

    /// External page renderer failed
    #[error("Render error: {0}")]
    Render(String),

    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::UnsupportedFormat { .. } => "UnsupportedFormatError",
            Error::SessionNotFound(_) => "SessionNotFound",
            Error::Timeout(_) => "Timeout",
            Error::StorageExhausted { .. } => "StorageExhausted",
            Error::Render(_) => "RenderError",
            Error::Pdf(_) => "PdfError",
            Error::Image(_) => "ImageError",
            Error::Io(_) => "IoError",
            Error::Config(_) => "ConfigError",
            Error::General(_) => "Error",
        }
    }
}
