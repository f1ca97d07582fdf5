//! Error taxonomy and plain-text error responses

use crate::rule::MAX_DELAY_SECS;
use crate::store::StoreError;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// Response header naming the error kind, for clients that script against us
pub const ERROR_HEADER: &str = "X-Delaygate-Error";

/// Broad classes of request failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `delay` is not a non-negative number
    InvalidDelay,
    /// `delay` exceeds the maximum
    DelayTooBig,
    /// `status` is not an HTTP status code
    InvalidStatus,
    /// Admin request addressed a builtin site
    ChangeBuiltinSite,
    /// Admin request addressed a site nobody created
    UnknownSite,
    /// Site name generation kept colliding
    CannotCreateSite,
    /// Storage or other server-side failure
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidDelay => StatusCode::BAD_REQUEST,
            ErrorKind::DelayTooBig => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidStatus => StatusCode::BAD_REQUEST,
            ErrorKind::ChangeBuiltinSite => StatusCode::FORBIDDEN,
            ErrorKind::UnknownSite => StatusCode::NOT_FOUND,
            ErrorKind::CannotCreateSite => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the [`ERROR_HEADER`] header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ErrorKind::InvalidDelay => "INVALID_DELAY",
            ErrorKind::DelayTooBig => "DELAY_TOO_BIG",
            ErrorKind::InvalidStatus => "INVALID_STATUS",
            ErrorKind::ChangeBuiltinSite => "CHANGE_BUILTIN_SITE",
            ErrorKind::UnknownSite => "UNKNOWN_SITE",
            ErrorKind::CannotCreateSite => "CANNOT_CREATE_SITE",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Errors surfaced to the caller of a create-site or admin request
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("Oopsie daisy! Could not convert delay <{0}> to a non-negative number of seconds.")]
    InvalidDelay(String),
    #[error(
        "Oopsie daisy! Delay can't be greater than {max}s, got delay {0}s.",
        max = MAX_DELAY_SECS
    )]
    DelayTooBig(f64),
    #[error("Oopsie daisy! Could not convert status <{0}> to an HTTP status code.")]
    InvalidStatus(String),
    #[error("Oopsie daisy! You can't change builtin sites.")]
    ChangeBuiltinSite,
    #[error("Oopsie daisy! Site <{0}> doesn't exist.")]
    UnknownSite(String),
    #[error(
        "Oopsie daisy!\n\nCan't create a new site. It's not your fault.\n\n\
         Please try again in a few seconds."
    )]
    CannotCreateSite,
    #[error("Internal error: {0}.")]
    Storage(#[from] StoreError),
}

impl SiteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SiteError::InvalidDelay(_) => ErrorKind::InvalidDelay,
            SiteError::DelayTooBig(_) => ErrorKind::DelayTooBig,
            SiteError::InvalidStatus(_) => ErrorKind::InvalidStatus,
            SiteError::ChangeBuiltinSite => ErrorKind::ChangeBuiltinSite,
            SiteError::UnknownSite(_) => ErrorKind::UnknownSite,
            SiteError::CannotCreateSite => ErrorKind::CannotCreateSite,
            SiteError::Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn to_response(&self) -> Response<Full<Bytes>> {
        text_error_response(self.kind(), self.to_string())
    }
}

/// Plain-text error response with the [`ERROR_HEADER`] header
pub fn text_error_response(kind: ErrorKind, message: impl Into<String>) -> Response<Full<Bytes>> {
    let mut body = message.into();
    if !body.ends_with('\n') {
        body.push('\n');
    }

    Response::builder()
        .status(kind.status_code())
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("X-Content-Type-Options", "nosniff")
        .header(ERROR_HEADER, kind.as_header_value())
        .body(Full::new(Bytes::from(body)))
        .expect("valid response with StatusCode enum and static headers")
}
