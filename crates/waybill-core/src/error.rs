// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the waybill client.

use thiserror::Error;

use crate::types::ErrorKind;

/// Top-level error type for all waybill operations.
#[derive(Debug, Error)]
pub enum WaybillError {
    // -- Label service errors --
    #[error("batch {0} does not exist or has no labels")]
    BatchNotFound(String),

    #[error("label {0} does not exist")]
    LabelNotExist(String),

    #[error("label {0} is still being generated")]
    LabelNotReady(String),

    #[error("label service unreachable: {0}")]
    Network(String),

    #[error("malformed label service response: {0}")]
    MalformedResponse(String),

    // -- Rendering errors --
    #[error("image conversion failed: {0}")]
    ImageConversion(String),

    // -- Printing errors --
    #[error("printer unavailable: {0}")]
    PrinterUnavailable(String),

    /// Sibling of a failed member in an all-or-nothing batch.
    #[error("cancelled because label {failed} in the same batch failed")]
    UserCancelled { failed: String },

    // -- Configuration / plumbing --
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("print queue closed")]
    QueueClosed,

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WaybillError {
    /// The caller-facing error category for outcome reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BatchNotFound(_) => ErrorKind::BatchNotFound,
            Self::LabelNotExist(_) => ErrorKind::LabelNotExist,
            Self::LabelNotReady(_) => ErrorKind::LabelNotReady,
            Self::Network(_) => ErrorKind::NetworkUnavailable,
            Self::ImageConversion(_) => ErrorKind::ImageConversionFailed,
            Self::PrinterUnavailable(_) => ErrorKind::PrinterUnavailable,
            Self::UserCancelled { .. } => ErrorKind::UserCancelled,
            Self::MalformedResponse(_)
            | Self::InvalidConfig(_)
            | Self::QueueClosed
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Unknown,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WaybillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            WaybillError::LabelNotReady("u1".into()).kind(),
            ErrorKind::LabelNotReady
        );
        assert_eq!(
            WaybillError::Network("refused".into()).kind(),
            ErrorKind::NetworkUnavailable
        );
        assert_eq!(
            WaybillError::MalformedResponse("{".into()).kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn messages_are_never_empty() {
        let errors = [
            WaybillError::BatchNotFound("B1".into()),
            WaybillError::UserCancelled { failed: "u2".into() },
            WaybillError::QueueClosed,
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
