//! Error types for CAS validation, proxy handling and logout

use thiserror::Error;

use crate::types::ProtocolVersion;

#[derive(Debug, Error)]
pub enum CasError {
    #[error("No response from CAS server at {url}: {reason}")]
    NoResponse { url: String, reason: String },

    #[error("Malformed CAS response: {0}")]
    MalformedResponse(String),

    #[error("Ticket rejected by CAS server (code: {code:?})")]
    TicketRejected {
        code: Option<String>,
        message: Option<String>,
    },

    #[error("Proxy chain not allowed: {0:?}")]
    ProxyNotAllowed(Vec<String>),

    #[error("Ticket validated but no PGT IOU was transmitted")]
    NoPgtIssued,

    #[error("PGT IOU has wrong format: {0}")]
    MalformedPgtIou(String),

    #[error("PGT IOU {0} was transmitted but the PGT could not be retrieved")]
    PgtNotFound(String),

    #[error("No ticket present in the request")]
    NoTicket,

    #[error("Protocol {0} has no proxy validation endpoint")]
    ProxyValidationUnsupported(ProtocolVersion),

    #[error("Invalid PGT callback: {0}")]
    InvalidCallback(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Session store error: {0}")]
    SessionError(String),

    #[error("PGT storage error: {0}")]
    StorageError(String),
}

/// Stable, language-neutral error codes.
///
/// Callers map these to localized messages; the crate itself never matches on
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoResponse,
    MalformedResponse,
    TicketRejected,
    ProxyNotAllowed,
    NoPgtIssued,
    MalformedPgtIou,
    PgtNotFound,
    NoTicket,
    ProxyValidationUnsupported,
    InvalidCallback,
    Config,
    Session,
    Storage,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoResponse => "cas.no_response",
            ErrorCode::MalformedResponse => "cas.malformed_response",
            ErrorCode::TicketRejected => "cas.ticket_rejected",
            ErrorCode::ProxyNotAllowed => "cas.proxy_not_allowed",
            ErrorCode::NoPgtIssued => "cas.no_pgt_issued",
            ErrorCode::MalformedPgtIou => "cas.malformed_pgt_iou",
            ErrorCode::PgtNotFound => "cas.pgt_not_found",
            ErrorCode::NoTicket => "cas.no_ticket",
            ErrorCode::ProxyValidationUnsupported => "cas.proxy_validation_unsupported",
            ErrorCode::InvalidCallback => "cas.invalid_callback",
            ErrorCode::Config => "cas.config",
            ErrorCode::Session => "cas.session",
            ErrorCode::Storage => "cas.storage",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CasError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CasError::NoResponse { .. } => ErrorCode::NoResponse,
            CasError::MalformedResponse(_) => ErrorCode::MalformedResponse,
            CasError::TicketRejected { .. } => ErrorCode::TicketRejected,
            CasError::ProxyNotAllowed(_) => ErrorCode::ProxyNotAllowed,
            CasError::NoPgtIssued => ErrorCode::NoPgtIssued,
            CasError::MalformedPgtIou(_) => ErrorCode::MalformedPgtIou,
            CasError::PgtNotFound(_) => ErrorCode::PgtNotFound,
            CasError::NoTicket => ErrorCode::NoTicket,
            CasError::ProxyValidationUnsupported(_) => ErrorCode::ProxyValidationUnsupported,
            CasError::InvalidCallback(_) => ErrorCode::InvalidCallback,
            CasError::ConfigError(_) => ErrorCode::Config,
            CasError::SessionError(_) => ErrorCode::Session,
            CasError::StorageError(_) => ErrorCode::Storage,
        }
    }

    /// True for failures caused by the presented ticket rather than by the
    /// environment (transport, configuration, storage).
    pub fn is_ticket_failure(&self) -> bool {
        matches!(
            self,
            CasError::TicketRejected { .. }
                | CasError::MalformedResponse(_)
                | CasError::ProxyNotAllowed(_)
                | CasError::NoPgtIssued
                | CasError::MalformedPgtIou(_)
                | CasError::PgtNotFound(_)
        )
    }
}

impl From<config::ConfigError> for CasError {
    fn from(err: config::ConfigError) -> Self {
        CasError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CasError>;
