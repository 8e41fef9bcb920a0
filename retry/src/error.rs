//! Typed errors for oVirt engine calls
//!
//! Every error that leaves this crate is a [`TypedError`]: a human readable
//! message, an [`ErrorCode`] and an optional cause. The code decides whether
//! the retry executor may try again and whether a recovery action exists.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::retry::classifier;

/// Boxed error accepted from operations and recovery actions.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias for retried calls
pub type Result<T> = std::result::Result<T, TypedError>;

/// Class of failure attached to a [`TypedError`].
///
/// The string form (`not_found`, `disk_locked`, ...) is stable and is what
/// appears in rendered error messages.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    /// Credentials were rejected or the user lacks permission.
    AccessDenied,
    /// The URL does not point to an oVirt engine.
    NotAnOvirtEngine,
    /// TLS handshake or certificate verification failed.
    TlsError,
    NotFound,
    /// A lookup by name matched more than one object.
    MultipleResults,
    /// Should never happen; the engine returned something its API contract rules out.
    Bug,
    Unsupported,
    /// A field the engine should always send was missing from the response.
    FieldMissing,
    /// An HTTP request failed in a way retrying cannot fix.
    PermanentHttpError,
    UnexpectedDiskStatus,
    /// The VM has no bootable disk.
    CannotRunVm,
    BadArgument,
    /// No rule matched. Assumed transient.
    Unidentified,
    Connection,
    /// A status wait whose condition does not hold yet.
    Pending,
    Timeout,
    DiskLocked,
    VmLocked,
    RelatedOperationInProgress,
    Conflict,
    HotPlugFailed,
    LocalIoError,
    FileReadFailed,
    UnexpectedImageTransferPhase,
    /// The SSO token expired; reconnecting fixes it.
    InvalidGrant,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Whether an automatic retry may ever be attempted for this code.
    pub fn can_auto_retry(self) -> bool {
        !matches!(
            self,
            ErrorCode::BadArgument
                | ErrorCode::AccessDenied
                | ErrorCode::NotAnOvirtEngine
                | ErrorCode::TlsError
                | ErrorCode::NotFound
                | ErrorCode::MultipleResults
                | ErrorCode::Bug
                | ErrorCode::Unsupported
                | ErrorCode::FieldMissing
                | ErrorCode::PermanentHttpError
                | ErrorCode::UnexpectedDiskStatus
                | ErrorCode::CannotRunVm
        )
    }

    /// Whether a recovery action (distinct from a plain retry) exists for this code.
    pub fn can_recover(self) -> bool {
        matches!(self, ErrorCode::InvalidGrant)
    }
}

/// An error carrying an [`ErrorCode`], a message and an optional cause.
///
/// Instances are immutable; cloning shares the cause.
#[derive(Debug, Clone)]
pub struct TypedError {
    message: String,
    code: ErrorCode,
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl TypedError {
    /// Create an error without a cause.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            message: strip_code_prefix(&message).to_string(),
            code,
            cause: None,
        }
    }

    /// Wrap `cause` with a code and a description of what was being attempted.
    ///
    /// Wrapping with [`ErrorCode::Unidentified`] re-classifies: a typed error
    /// anywhere in the cause chain lends its code, otherwise the classifier
    /// gets a chance to identify the cause from its type and text.
    pub fn wrap(cause: impl Into<BoxError>, code: ErrorCode, message: impl Into<String>) -> Self {
        let mut cause: BoxError = cause.into();
        let mut code = code;

        if code == ErrorCode::Unidentified {
            if let Some(typed) = find_typed(cause.as_ref()) {
                code = typed.code;
            } else {
                let classified = classifier::classify(cause);
                code = classified.code;
                // The classifier keeps the original text in its message, so an
                // unidentified result can stand in for the raw cause.
                cause = Box::new(classified);
            }
        }

        let message = message.into();
        let detail = describe(cause.as_ref());
        let message = match (message.is_empty(), detail.is_empty()) {
            (true, _) => detail,
            (false, true) => message,
            (false, false) => format!("{message} ({detail})"),
        };

        Self::from_parts(code, &message, cause)
    }

    /// Build an error without re-classification.
    pub(crate) fn from_parts(code: ErrorCode, message: &str, cause: BoxError) -> Self {
        Self {
            message: strip_code_prefix(message).to_string(),
            code,
            cause: Some(Arc::from(cause)),
        }
    }

    /// Message with the vendor detail of the cause chain, without the code prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The wrapped error, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// True if this error or any typed error in its cause chain has `code`.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        chain(self).any(|err| {
            err.downcast_ref::<TypedError>()
                .is_some_and(|typed| typed.code == code)
        })
    }

    pub fn can_auto_retry(&self) -> bool {
        self.code.can_auto_retry()
    }

    pub fn can_recover(&self) -> bool {
        self.code.can_recover()
    }
}

impl fmt::Display for TypedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for TypedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Check whether `err` carries `code`, classifying it first if it is not typed.
///
/// Agrees with [`classifier::classify`]: an error nobody recognises has
/// [`ErrorCode::Unidentified`].
pub fn has_error_code(err: &(dyn StdError + 'static), code: ErrorCode) -> bool {
    if let Some(typed) = find_typed(err) {
        return typed.has_code(code);
    }
    let identified = classifier::identify(err).map_or(ErrorCode::Unidentified, |i| i.code);
    identified == code
}

/// Walk an error and its sources, outermost first.
pub(crate) fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |err| (*err).source())
}

/// First typed error in the chain of `err`, including `err` itself.
pub(crate) fn find_typed<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a TypedError> {
    chain(err).find_map(|err| err.downcast_ref::<TypedError>())
}

/// Drop leading `<code>: ` prefixes left behind by errors that were
/// rendered to text and then wrapped again.
pub(crate) fn strip_code_prefix(mut text: &str) -> &str {
    while let Some((head, rest)) = text.split_once(": ") {
        if head.parse::<ErrorCode>().is_err() {
            break;
        }
        text = rest;
    }
    text
}

// Typed causes already carry their detail in the message.
fn describe(cause: &(dyn StdError + 'static)) -> String {
    match cause.downcast_ref::<TypedError>() {
        Some(typed) => typed.message.clone(),
        None => strip_code_prefix(&cause.to_string()).to_string(),
    }
}
