use crate::wire::Status;
use std::fmt;

/// Typed SNEP failure, one per non-success response status.
///
/// Servers raise these from handler callbacks and answer with the
/// matching status octet; clients map error statuses back into them.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SnepError {
    NotFound,
    ExcessData,
    BadRequest,
    NotImplemented,
    UnsupportedVersion,
    Reject,
    /// A status octet outside the defined table.
    Other(u8),
}

impl SnepError {
    /// The response status octet this error travels as.
    #[inline]
    pub fn code(&self) -> u8 {
        match self {
            SnepError::NotFound => Status::NotFound.into(),
            SnepError::ExcessData => Status::ExcessData.into(),
            SnepError::BadRequest => Status::BadRequest.into(),
            SnepError::NotImplemented => Status::NotImplemented.into(),
            SnepError::UnsupportedVersion => Status::UnsupportedVersion.into(),
            SnepError::Reject => Status::Reject.into(),
            SnepError::Other(code) => *code,
        }
    }

    /// Maps a response status octet to its error.
    #[inline]
    pub fn from_status(code: u8) -> SnepError {
        match Status::parse(code) {
            Some(Status::NotFound) => SnepError::NotFound,
            Some(Status::ExcessData) => SnepError::ExcessData,
            Some(Status::BadRequest) => SnepError::BadRequest,
            Some(Status::NotImplemented) => SnepError::NotImplemented,
            Some(Status::UnsupportedVersion) => SnepError::UnsupportedVersion,
            Some(Status::Reject) => SnepError::Reject,
            _ => SnepError::Other(code),
        }
    }
}

impl fmt::Display for SnepError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SnepError::NotFound => write!(f, "resource not found"),
            SnepError::ExcessData => write!(f, "resource exceeds data size limit"),
            SnepError::BadRequest => write!(f, "malformed request not understood"),
            SnepError::NotImplemented => write!(f, "unsupported functionality requested"),
            SnepError::UnsupportedVersion => write!(f, "unsupported protocol version"),
            SnepError::Reject => write!(f, "request rejected by peer"),
            SnepError::Other(code) => write!(f, "unknown error code {:#04x}", code),
        }
    }
}

impl std::error::Error for SnepError {}
