//! Error classification for retry decisions
//!
//! The engine SDK exposes structured errors for only a handful of failure
//! modes, so most rules match on message text. Rules are evaluated in order
//! and the first match wins; several messages overlap, so the order is part
//! of the behaviour.

use std::error::Error as StdError;
use std::io;

use crate::error::{BoxError, ErrorCode, TypedError, chain, find_typed, strip_code_prefix};
use crate::sdk::SdkError;

/// Result of a successful identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identification {
    pub code: ErrorCode,
    /// Short description of the failure class, without vendor detail.
    pub message: &'static str,
}

impl Identification {
    const fn new(code: ErrorCode, message: &'static str) -> Self {
        Self { code, message }
    }
}

/// Identify the failure class of `err` from its type and the text of its
/// whole source chain.
///
/// Returns `None` when no rule matches; callers treat that as
/// [`ErrorCode::Unidentified`].
pub fn identify(err: &(dyn StdError + 'static)) -> Option<Identification> {
    let text = chain_text(err);
    let sdk = find_in_chain::<SdkError>(err);

    if text.contains("Cannot run VM without at least one bootable disk.") {
        return Some(Identification::new(
            ErrorCode::CannotRunVm,
            "the VM cannot be started without at least one bootable disk",
        ));
    }
    if text.contains("Physical Memory Guaranteed cannot exceed Memory Size") {
        return Some(Identification::new(
            ErrorCode::BadArgument,
            "the guaranteed memory cannot exceed the memory size",
        ));
    }
    // A redirect loop usually means the URL points at a login page.
    if text.contains("stopped after") && text.contains("redirects") {
        return Some(Identification::new(
            ErrorCode::NotAnOvirtEngine,
            "the server redirected too many times, the URL probably does not point to an oVirt engine",
        ));
    }
    if text.contains("parse non-array sso with response") {
        return Some(Identification::new(
            ErrorCode::NotAnOvirtEngine,
            "the SSO response could not be parsed, the credentials are wrong or the URL does not point to an oVirt engine",
        ));
    }
    if text.contains("server gave HTTP response to HTTPS client") {
        return Some(Identification::new(
            ErrorCode::NotAnOvirtEngine,
            "the server answered in plain HTTP, the URL does not point to an oVirt engine",
        ));
    }
    if text.contains(
        "invalid_grant: The provided authorization grant for the auth code has expired.",
    ) {
        return Some(Identification::new(
            ErrorCode::InvalidGrant,
            "the authorization grant has expired",
        ));
    }
    if text.contains("tls") || text.contains("x509") {
        return Some(Identification::new(
            ErrorCode::TlsError,
            "TLS negotiation or certificate verification failed",
        ));
    }
    if matches!(sdk, Some(SdkError::NotFound(_))) {
        return Some(Identification::new(
            ErrorCode::NotFound,
            "the requested object was not found",
        ));
    }
    if text.contains("Disk is locked") {
        return Some(Identification::new(ErrorCode::DiskLocked, "the disk is locked"));
    }
    if text.contains("VM is locked") {
        return Some(Identification::new(ErrorCode::VmLocked, "the VM is locked"));
    }
    if text.contains("Failed to hot-plug disk") {
        return Some(Identification::new(
            ErrorCode::HotPlugFailed,
            "hot-plugging the disk failed",
        ));
    }
    if text.contains("Related operation is currently in progress.") {
        return Some(Identification::new(
            ErrorCode::RelatedOperationInProgress,
            "a related operation is currently in progress",
        ));
    }
    if text.contains("Disk configuration")
        && text.contains("is incompatible with the storage domain type.")
    {
        return Some(Identification::new(
            ErrorCode::BadArgument,
            "the disk configuration is incompatible with the storage domain type",
        ));
    }
    if text.contains("409 Conflict") {
        return Some(Identification::new(
            ErrorCode::Conflict,
            "the engine reported a conflicting change",
        ));
    }
    if matches!(sdk, Some(SdkError::Authentication(_))) || text.contains("access_denied") {
        return Some(Identification::new(ErrorCode::AccessDenied, "access denied"));
    }

    // Structural fallbacks only apply when no engine message matched.
    if let Some(sdk) = sdk {
        if matches!(sdk, SdkError::Connection(_)) {
            return Some(Identification::new(
                ErrorCode::Connection,
                "the connection to the engine failed",
            ));
        }
        if sdk.is_permanent_http_failure() {
            return Some(Identification::new(
                ErrorCode::PermanentHttpError,
                "the engine rejected the request",
            ));
        }
    }
    find_in_chain::<io::Error>(err).and_then(classify_io_error)
}

/// Turn any error into a [`TypedError`].
///
/// Typed errors are returned unchanged, and an error wrapping a typed error
/// takes over its code. Anything else is identified; when no rule matches the
/// result is [`ErrorCode::Unidentified`] carrying the original text.
pub fn classify(err: impl Into<BoxError>) -> TypedError {
    let err: BoxError = err.into();
    let err = match err.downcast::<TypedError>() {
        Ok(typed) => return *typed,
        Err(err) => err,
    };

    if let Some(nested) = find_typed(err.as_ref()) {
        let code = nested.code();
        let message = nested_message(err.as_ref(), nested);
        return TypedError::from_parts(code, &message, err);
    }

    match identify(err.as_ref()) {
        Some(identified) => TypedError::wrap(err, identified.code, identified.message),
        None => {
            let text = chain_text(err.as_ref());
            TypedError::from_parts(ErrorCode::Unidentified, &text, err)
        }
    }
}

// Outer text with the nested error's detail, without its code prefix.
fn nested_message(err: &(dyn StdError + 'static), nested: &TypedError) -> String {
    let outer = err.to_string();
    let rendered = nested.to_string();
    if outer.contains(&rendered) {
        strip_code_prefix(&outer.replace(&rendered, nested.message())).to_string()
    } else if outer.contains(nested.message()) {
        strip_code_prefix(&outer).to_string()
    } else {
        format!("{} ({})", strip_code_prefix(&outer), nested.message())
    }
}

// Helper: classify std::io::Error based on ErrorKind
fn classify_io_error(err: &io::Error) -> Option<Identification> {
    use io::ErrorKind;

    match err.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => Some(Identification::new(
            ErrorCode::Connection,
            "the connection to the engine failed",
        )),
        ErrorKind::TimedOut => Some(Identification::new(
            ErrorCode::Timeout,
            "the operation timed out",
        )),
        _ => None,
    }
}

// Rendered text of every error in the chain, outermost first.
fn chain_text(err: &(dyn StdError + 'static)) -> String {
    chain(err)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

fn find_in_chain<'a, T: StdError + 'static>(
    err: &'a (dyn StdError + 'static),
) -> Option<&'a T> {
    chain(err).find_map(|err| err.downcast_ref::<T>())
}
