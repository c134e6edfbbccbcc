// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for warehouse operators.
//
// Every technical error is mapped to a plain sentence with a clear next step.

use crate::error::WaybillError;

/// Severity of an error from the operator's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Network blip or label still rendering; trying again later helps.
    Transient,
    /// Operator must do something (pick a printer, check the batch number).
    ActionRequired,
    /// Cannot be fixed by retrying.
    Permanent,
}

/// A human-readable error with a message and an actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Short summary (shown as a heading).
    pub message: String,
    /// What the operator should try.
    pub suggestion: String,
    /// Whether submitting the same request again may succeed.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `WaybillError` into a `HumanError` an operator can act on.
pub fn humanize_error(err: &WaybillError) -> HumanError {
    match err {
        WaybillError::BatchNotFound(batch) => HumanError {
            message: "This batch number was not found.".into(),
            suggestion: format!("Check the batch number ({batch}) and scan it again."),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        WaybillError::LabelNotExist(code) => HumanError {
            message: "This label does not exist.".into(),
            suggestion: format!("Check the label code ({code}) or look the batch up again."),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        WaybillError::LabelNotReady(_) => HumanError {
            message: "The label is still being generated.".into(),
            suggestion: "Wait a few seconds, then print again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        WaybillError::Network(detail) => HumanError {
            message: "The label service can't be reached.".into(),
            suggestion: format!(
                "Check the network connection of this workstation, then try again. (Detail: {detail})"
            ),
            retriable: true,
            severity: Severity::Transient,
        },

        WaybillError::MalformedResponse(_) => HumanError {
            message: "The label service sent an answer we don't understand.".into(),
            suggestion: "Try again. If this keeps happening, report it to the label service team.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        WaybillError::ImageConversion(_) => HumanError {
            message: "The label image could not be prepared for this printer.".into(),
            suggestion: "Report the label code to the label service team; the image is unusable.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        WaybillError::PrinterUnavailable(printer) => HumanError {
            message: "The printer is not available.".into(),
            suggestion: format!(
                "Make sure the printer is switched on and connected, or pick another one. ({printer})"
            ),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        WaybillError::UserCancelled { failed } => HumanError {
            message: "Nothing in this batch was printed.".into(),
            suggestion: format!("Label {failed} failed; fix it, then print the whole batch again."),
            retriable: true,
            severity: Severity::ActionRequired,
        },

        WaybillError::InvalidConfig(detail) => HumanError {
            message: "The printing client is not set up correctly.".into(),
            suggestion: format!("Fix the configuration and restart. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        WaybillError::QueueClosed => HumanError {
            message: "The printing client is shutting down.".into(),
            suggestion: "Restart the application, then print again.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        WaybillError::Io(io_err) => HumanError {
            message: "A file could not be read or written.".into(),
            suggestion: format!("Check the file exists and is readable. ({io_err})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        WaybillError::Serialization(detail) => HumanError {
            message: "Some data could not be read.".into(),
            suggestion: format!("The data may be damaged. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },
    }
}
