//! The error taxonomy surfaced to the OS.
//!
//! Callbacks never panic or propagate rich errors across the OS boundary;
//! every failure collapses to one of these kinds. Remote failures are mapped
//! here, at a single chokepoint, from the HTTP-style status the store
//! reported.

use log::error;
use thiserror::Error;

use crate::store::RemoteError;

/// Status kinds a callback can answer with. Success is the `Ok` arm of the
/// surrounding `Result`.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
pub enum Status {
    /// The addressed file does not exist, and no directory hides behind the
    /// same prefix either.
    #[error("file not found")]
    FileNotFound,
    /// A create-new or non-replacing rename hit an existing key.
    #[error("file already exists")]
    FileExists,
    /// A write-path callback on a read-only mount, or a remote 403.
    #[error("access denied")]
    AccessDenied,
    /// A remote conflict or failed precondition (409 / 412).
    #[error("sharing violation")]
    SharingViolation,
    /// A remote range error (416) or an argument the adapter rejects.
    #[error("invalid parameter")]
    InvalidParameter,
    /// The handle's context is gone.
    #[error("invalid handle")]
    InvalidHandle,
    /// Locks, security descriptors and alternate streams are not provided.
    #[error("not implemented")]
    NotImplemented,
    /// Everything else; details are in the log.
    #[error("internal error")]
    Internal,
}

impl From<RemoteError> for Status {
    fn from(remote: RemoteError) -> Self {
        match remote.status() {
            Some(404) => Status::FileNotFound,
            Some(403) => Status::AccessDenied,
            Some(409) | Some(412) => Status::SharingViolation,
            Some(416) => Status::InvalidParameter,
            _ => {
                error!("unmapped remote failure: {remote}");
                Status::Internal
            }
        }
    }
}
