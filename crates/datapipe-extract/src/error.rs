//! Error types for the extraction crate

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Source API unreachable or the request failed in transit
    E001SourceRequest,
    /// E002: Source API answered with a non-2xx status
    E002SourceStatus,
    /// E003: Source payload is not the expected shape
    E003InvalidPayload,
    /// E004: Configuration missing or invalid
    E004InvalidConfig,
    /// E005: Write to object storage failed
    E005WriteFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001SourceRequest => "E001",
            Self::E002SourceStatus => "E002",
            Self::E003InvalidPayload => "E003",
            Self::E004InvalidConfig => "E004",
            Self::E005WriteFailure => "E005",
        }
    }
}

/// Errors that can occur while extracting and landing records
#[derive(Debug, Error)]
pub enum ExtractError {
    /// HTTP request could not be completed
    #[error("[{code}] Request to '{url}' failed: {reason}")]
    SourceRequest {
        code: &'static str,
        url: String,
        reason: String,
    },

    /// HTTP request completed with an error status
    #[error("[{code}] '{url}' responded with HTTP {status}")]
    SourceStatus {
        code: &'static str,
        url: String,
        status: u16,
    },

    /// Payload could not be decoded or flattened
    #[error("[{code}] Invalid payload: {message}")]
    InvalidPayload { code: &'static str, message: String },

    /// Invalid configuration provided
    #[error("[{code}] Invalid configuration: {message}")]
    InvalidConfig { code: &'static str, message: String },

    /// Object storage write failed
    #[error("[{code}] Write to '{path}' failed: {reason}")]
    WriteFailure {
        code: &'static str,
        path: String,
        reason: String,
    },
}

impl ExtractError {
    pub fn source_request(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceRequest {
            code: ErrorCode::E001SourceRequest.as_str(),
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn source_status(url: impl Into<String>, status: u16) -> Self {
        Self::SourceStatus {
            code: ErrorCode::E002SourceStatus.as_str(),
            url: url.into(),
            status,
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            code: ErrorCode::E003InvalidPayload.as_str(),
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            code: ErrorCode::E004InvalidConfig.as_str(),
            message: message.into(),
        }
    }

    pub fn write_failure(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailure {
            code: ErrorCode::E005WriteFailure.as_str(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SourceRequest { .. } => ErrorCode::E001SourceRequest,
            Self::SourceStatus { .. } => ErrorCode::E002SourceStatus,
            Self::InvalidPayload { .. } => ErrorCode::E003InvalidPayload,
            Self::InvalidConfig { .. } => ErrorCode::E004InvalidConfig,
            Self::WriteFailure { .. } => ErrorCode::E005WriteFailure,
        }
    }
}

/// Result type alias for ExtractError
pub type Result<T> = std::result::Result<T, ExtractError>;
