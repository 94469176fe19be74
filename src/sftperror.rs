#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use snafu::prelude::*;

use crate::sftpwire::WireError;

/// The sunset-sftpd error type.
///
/// Some variants end the session (see [`SftpError::is_fatal`]), the rest
/// are answered with a status reply and the session continues.
#[non_exhaustive]
#[derive(Snafu, Debug)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum SftpError {
    /// Input stream ended part way through a packet
    Truncated,

    #[snafu(display("Packet size {size} too large"))]
    BigPacket { size: usize },

    /// Packet without a type byte
    BadPacket,

    /// Request received before `SSH_FXP_INIT`
    NotInitialized,

    /// `SSH_FXP_INIT` received after the session started
    AlreadyInitialized,

    /// The init packet could not be decoded
    MalformedPacket,

    #[snafu(display("Bad request: {source}"))]
    Wire { source: WireError },

    /// Handle is unknown, or was already closed
    UnknownHandle,

    /// A file operation on a directory handle or the reverse
    WrongHandleKind,

    /// End of file, or end of a directory listing
    Eof,

    /// Path resolves outside the served directory
    OutsideRoot,

    /// Request type isn't handled
    NotSupported,

    /// Failure from the storage backend
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// Failure reading the input stream. Will end the session.
    #[snafu(display("Input failed: {source}"))]
    Input { source: std::io::Error },

    /// Failure writing a reply. Will end the session.
    #[snafu(display("Output failed: {source}"))]
    Output { source: std::io::Error },
}

impl SftpError {
    /// Errors that end the session rather than being answered
    /// with a status reply.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SftpError::Truncated
                | SftpError::BigPacket { .. }
                | SftpError::BadPacket
                | SftpError::NotInitialized
                | SftpError::AlreadyInitialized
                | SftpError::MalformedPacket
                | SftpError::Input { .. }
                | SftpError::Output { .. }
        )
    }
}

impl From<WireError> for SftpError {
    fn from(source: WireError) -> Self {
        SftpError::Wire { source }
    }
}

impl From<std::io::Error> for SftpError {
    fn from(source: std::io::Error) -> Self {
        SftpError::Io { source }
    }
}

/// A sunset-sftpd specific Result type.
pub type SftpResult<T, E = SftpError> = core::result::Result<T, E>;
