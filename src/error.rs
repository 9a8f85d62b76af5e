//! Escrow error types
//!
//! One taxonomy for the lifecycle, the payment coordinator and the
//! store-backed collaborators. Codes are stable strings for API responses.

use thiserror::Error;

use crate::entity::MappingError;
use crate::escrow::status::TransactionStatus;
use crate::payment::gateway::GatewayError;
use crate::store::StoreError;

/// Bad input. Recoverable by retrying with corrected input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Phone and NID verification required")]
    VerificationRequired,

    #[error("Invalid service charge option: {0}")]
    UnknownServiceChargeOption(String),

    #[error("Unknown transaction status: {0}")]
    UnknownStatus(String),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Buyer and seller must be different users")]
    SameParty,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("An open payment authorization already exists for this transaction")]
    AuthorizationAlreadyOpen,

    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    #[error("Dispute is already closed")]
    DisputeClosed,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code expired")]
    CodeExpired,
}

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot {op} a transaction in status {from}")]
    IllegalTransition {
        op: &'static str,
        from: TransactionStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Gateway error: {message} ({details})")]
    Gateway { message: String, details: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EscrowError::NotFound(what.into())
    }

    pub fn permission_denied(why: impl Into<String>) -> Self {
        EscrowError::PermissionDenied(why.into())
    }

    /// True for the "verify your phone/NID first" signal.
    pub fn is_verification_required(&self) -> bool {
        matches!(
            self,
            EscrowError::Validation(ValidationError::VerificationRequired)
        )
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::Validation(v) => match v {
                ValidationError::VerificationRequired => "VERIFICATION_REQUIRED",
                ValidationError::UnknownServiceChargeOption(_) => "INVALID_SERVICE_CHARGE_OPTION",
                ValidationError::UnknownStatus(_) => "INVALID_STATUS",
                ValidationError::InvalidAmount => "INVALID_AMOUNT",
                ValidationError::SameParty => "SAME_PARTY",
                ValidationError::MissingField(_) => "MISSING_FIELD",
                ValidationError::AuthorizationAlreadyOpen => "AUTHORIZATION_ALREADY_OPEN",
                ValidationError::AlreadyExists(_) => "ALREADY_EXISTS",
                ValidationError::DisputeClosed => "DISPUTE_CLOSED",
                ValidationError::InvalidCode => "INVALID_CODE",
                ValidationError::CodeExpired => "CODE_EXPIRED",
            },
            EscrowError::PermissionDenied(_) => "PERMISSION_DENIED",
            EscrowError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            EscrowError::NotFound(_) => "NOT_FOUND",
            EscrowError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            EscrowError::Gateway { .. } => "GATEWAY_ERROR",
            EscrowError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            EscrowError::Validation(_) => 400,
            EscrowError::PermissionDenied(_) => 403,
            EscrowError::NotFound(_) => 404,
            EscrowError::IllegalTransition { .. } => 409,
            EscrowError::Gateway { .. } => 502,
            EscrowError::StoreUnavailable(_) => 503,
            EscrowError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for EscrowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable { .. } | StoreError::Corrupt(_) => {
                EscrowError::StoreUnavailable(e.to_string())
            }
            StoreError::NotFound { .. } => EscrowError::NotFound(e.to_string()),
            StoreError::TableNotFound(_)
            | StoreError::UnknownColumn { .. }
            | StoreError::Conflict { .. } => EscrowError::Internal(e.to_string()),
        }
    }
}

impl From<MappingError> for EscrowError {
    fn from(e: MappingError) -> Self {
        EscrowError::Internal(e.to_string())
    }
}

impl From<GatewayError> for EscrowError {
    fn from(e: GatewayError) -> Self {
        EscrowError::Gateway {
            message: e.message,
            details: e.details,
        }
    }
}
