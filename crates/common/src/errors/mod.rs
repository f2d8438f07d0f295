//! Error types for the Quarry search service
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling
//!
//! The search pipeline distinguishes three failure classes: query-level
//! rejections (`InvalidQuery`), per-channel degradations that the query
//! survives (`ChannelTimeout`, `ChannelUnavailable`, `RerankerUnavailable`),
//! and total failures that must be surfaced (`AllChannelsFailed`,
//! `EmbeddingDimensionMismatch`). "No matches" is never an error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    InvalidQuery,
    ValidationError,
    InvalidChunk,

    // Resource errors (4xxx)
    NotFound,
    DocumentNotFound,
    ChunkNotFound,

    // Retrieval channel / external service errors (8xxx)
    ChannelTimeout,
    ChannelUnavailable,
    RerankerUnavailable,
    AllChannelsFailed,
    EmbeddingError,
    EmbeddingTimeout,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    EmbeddingDimensionMismatch,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::InvalidQuery => 1001,
            ErrorCode::ValidationError => 1002,
            ErrorCode::InvalidChunk => 1003,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::DocumentNotFound => 4002,
            ErrorCode::ChunkNotFound => 4003,

            // Channels / external (8xxx)
            ErrorCode::ChannelTimeout => 8001,
            ErrorCode::ChannelUnavailable => 8002,
            ErrorCode::RerankerUnavailable => 8003,
            ErrorCode::AllChannelsFailed => 8004,
            ErrorCode::EmbeddingError => 8005,
            ErrorCode::EmbeddingTimeout => 8006,
            ErrorCode::UpstreamError => 8007,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::EmbeddingDimensionMismatch => 9004,
        }
    }
}

/// The retrieval channel an error originated from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Semantic,
    Lexical,
    Relation,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Semantic => "semantic",
            ChannelKind::Lexical => "lexical",
            ChannelKind::Relation => "relation",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid chunk: {message}")]
    InvalidChunk { message: String },

    // Resource errors
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Chunk not found: {id}")]
    ChunkNotFound { id: String },

    // Retrieval channel errors (recovered locally; a single channel
    // failing degrades the query, it does not fail it)
    #[error("Retrieval channel {channel} timed out after {timeout_ms}ms")]
    ChannelTimeout {
        channel: ChannelKind,
        timeout_ms: u64,
    },

    #[error("Retrieval channel {channel} unavailable: {message}")]
    ChannelUnavailable {
        channel: ChannelKind,
        message: String,
    },

    #[error("Reranker unavailable: {message}")]
    RerankerUnavailable { message: String },

    #[error("All retrieval channels failed")]
    AllChannelsFailed,

    // Embedding provider errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Embedding dimension mismatch: index expects {expected}, model produces {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidQuery { .. } => ErrorCode::InvalidQuery,
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidChunk { .. } => ErrorCode::InvalidChunk,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::ChunkNotFound { .. } => ErrorCode::ChunkNotFound,
            AppError::ChannelTimeout { .. } => ErrorCode::ChannelTimeout,
            AppError::ChannelUnavailable { .. } => ErrorCode::ChannelUnavailable,
            AppError::RerankerUnavailable { .. } => ErrorCode::RerankerUnavailable,
            AppError::AllChannelsFailed => ErrorCode::AllChannelsFailed,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::EmbeddingDimensionMismatch { .. } => {
                ErrorCode::EmbeddingDimensionMismatch
            }
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::InvalidQuery { .. } | AppError::Validation { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            AppError::DocumentNotFound { .. } | AppError::ChunkNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            // 422 Unprocessable Entity
            AppError::InvalidChunk { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::ChannelUnavailable { .. }
            | AppError::RerankerUnavailable { .. }
            | AppError::AllChannelsFailed
            | AppError::EmbeddingError { .. }
            | AppError::EmbeddingTimeout { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable - blocks serving until resolved
            AppError::EmbeddingDimensionMismatch { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::ChannelTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Errors recovered locally by the pipeline: the affected channel is
    /// treated as having returned an empty list and the query proceeds.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            AppError::ChannelTimeout { .. }
                | AppError::ChannelUnavailable { .. }
                | AppError::RerankerUnavailable { .. }
        )
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
