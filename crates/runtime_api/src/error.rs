//! Error types shared across the plugin boundary.
//!
//! Plugin code sees exactly two failure channels:
//!
//! * [`RuntimeError::Type`] - an argument crossing the boundary did not have
//!   the expected shape (bad JSON, wrong field type, missing value).
//! * [`RuntimeError::Status`] - a failure carrying a status [`Code`] from the
//!   standard RPC taxonomy. Plugins raise these from RPC functions and hooks
//!   to signal client-facing failures, and the host raises them from
//!   [`ServerApi`](crate::ServerApi) calls.
//!
//! There is no retry policy at this layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// RPC status codes supported for errors raised by plugins and the host.
///
/// Numeric values match the gRPC status codes so they can be forwarded to
/// clients unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    /// The operation was cancelled, typically by the caller.
    Cancelled,
    /// Unknown error, or an error without enough information to classify.
    Unknown,
    /// The client specified an argument that is invalid regardless of state.
    InvalidArgument,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded,
    /// A requested entity was not found.
    NotFound,
    /// The entity a client attempted to create already exists.
    AlreadyExists,
    /// The caller is identified but not allowed to perform the operation.
    PermissionDenied,
    /// Some resource (quota, queue, capacity) has been exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted, typically due to a concurrency conflict.
    Aborted,
    /// The operation was attempted past the valid range.
    OutOfRange,
    /// The operation is not implemented or not enabled.
    Unimplemented,
    /// An internal invariant was broken.
    Internal,
    /// The service is currently unavailable; retrying may succeed.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
    /// The request does not have valid authentication credentials.
    Unauthenticated,
}

impl Code {
    /// All codes in numeric order.
    pub const ALL: [Code; 16] = [
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    /// Returns the numeric gRPC value of this code.
    pub fn as_u32(self) -> u32 {
        match self {
            Code::Cancelled => 1,
            Code::Unknown => 2,
            Code::InvalidArgument => 3,
            Code::DeadlineExceeded => 4,
            Code::NotFound => 5,
            Code::AlreadyExists => 6,
            Code::PermissionDenied => 7,
            Code::ResourceExhausted => 8,
            Code::FailedPrecondition => 9,
            Code::Aborted => 10,
            Code::OutOfRange => 11,
            Code::Unimplemented => 12,
            Code::Internal => 13,
            Code::Unavailable => 14,
            Code::DataLoss => 15,
            Code::Unauthenticated => 16,
        }
    }

    /// Looks a code up by its numeric value.
    ///
    /// Returns `None` for `0` (OK) and for values outside the taxonomy.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_u32() == value)
    }

    /// HTTP status a transport should use when surfacing this code.
    pub fn http_status(self) -> u16 {
        match self {
            Code::Cancelled => 499,
            Code::Unknown => 500,
            Code::InvalidArgument => 400,
            Code::DeadlineExceeded => 504,
            Code::NotFound => 404,
            Code::AlreadyExists => 409,
            Code::PermissionDenied => 403,
            Code::ResourceExhausted => 429,
            Code::FailedPrecondition => 400,
            Code::Aborted => 409,
            Code::OutOfRange => 400,
            Code::Unimplemented => 501,
            Code::Internal => 500,
            Code::Unavailable => 503,
            Code::DataLoss => 500,
            Code::Unauthenticated => 401,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors crossing the plugin boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Arguments passed across the boundary did not match the expected shape.
    #[error("type error: {0}")]
    Type(String),
    /// A failure with an RPC status code.
    #[error("{code}: {message}")]
    Status {
        /// Status code reported to the caller
        code: Code,
        /// Human-readable message reported to the caller
        message: String,
    },
}

impl RuntimeError {
    /// Creates a status error with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Creates a type-mismatch error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// The status code a transport should report for this error.
    ///
    /// Type errors are always reported as `INVALID_ARGUMENT`.
    pub fn code(&self) -> Code {
        match self {
            RuntimeError::Type(_) => Code::InvalidArgument,
            RuntimeError::Status { code, .. } => *code,
        }
    }

    /// The message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            RuntimeError::Type(message) => message,
            RuntimeError::Status { message, .. } => message,
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        RuntimeError::Type(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_numeric_values_round_trip() {
        for (index, code) in Code::ALL.iter().enumerate() {
            assert_eq!(code.as_u32(), index as u32 + 1);
            assert_eq!(Code::from_u32(code.as_u32()), Some(*code));
        }
        assert_eq!(Code::from_u32(0), None);
        assert_eq!(Code::from_u32(17), None);
    }

    #[test]
    fn test_code_display_and_serde_agree() {
        let json = serde_json::to_string(&Code::FailedPrecondition).unwrap();
        assert_eq!(json, "\"FAILED_PRECONDITION\"");
        assert_eq!(Code::FailedPrecondition.to_string(), "FAILED_PRECONDITION");
    }

    #[test]
    fn test_type_errors_report_invalid_argument() {
        let err: RuntimeError = serde_json::from_str::<u32>("\"nope\"").unwrap_err().into();
        assert!(matches!(err, RuntimeError::Type(_)));
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.code().http_status(), 400);
    }

    #[test]
    fn test_status_error_formatting() {
        let err = RuntimeError::not_found("match missing");
        assert_eq!(err.to_string(), "NOT_FOUND: match missing");
        assert_eq!(err.message(), "match missing");
        assert_eq!(err.code().http_status(), 404);
    }
}
