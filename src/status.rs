//! Mapping of outcomes to `SSH_FXP_STATUS` replies.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::io::ErrorKind;

use crate::proto::{ReqId, SftpPacket, Status, StatusCode};
use crate::sftperror::SftpError;

/// Language tag sent with every status message
pub const STATUS_LANG: &str = "en";

impl From<&SftpError> for StatusCode {
    fn from(e: &SftpError) -> Self {
        match e {
            SftpError::Eof => StatusCode::SSH_FX_EOF,
            SftpError::Io { source } => match source.kind() {
                ErrorKind::NotFound => StatusCode::SSH_FX_NO_SUCH_FILE,
                ErrorKind::PermissionDenied => StatusCode::SSH_FX_PERMISSION_DENIED,
                ErrorKind::Unsupported => StatusCode::SSH_FX_OP_UNSUPPORTED,
                _ => StatusCode::SSH_FX_FAILURE,
            },
            SftpError::OutsideRoot => StatusCode::SSH_FX_PERMISSION_DENIED,
            SftpError::Wire { .. } => StatusCode::SSH_FX_BAD_MESSAGE,
            SftpError::NotSupported => StatusCode::SSH_FX_OP_UNSUPPORTED,
            // UnknownHandle, WrongHandleKind, and anything fatal that
            // ended up here
            _ => StatusCode::SSH_FX_FAILURE,
        }
    }
}

impl StatusCode {
    /// The fixed message sent with a code
    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::SSH_FX_OK => "Success",
            StatusCode::SSH_FX_EOF => "End of file",
            StatusCode::SSH_FX_NO_SUCH_FILE => "No such file or directory",
            StatusCode::SSH_FX_PERMISSION_DENIED => "Permission denied",
            StatusCode::SSH_FX_FAILURE => "Failure",
            StatusCode::SSH_FX_BAD_MESSAGE => "Bad message",
            StatusCode::SSH_FX_NO_CONNECTION => "No connection",
            StatusCode::SSH_FX_CONNECTION_LOST => "Connection lost",
            StatusCode::SSH_FX_OP_UNSUPPORTED => "Operation not supported",
            StatusCode::Other(_) => "Unknown error",
        }
    }
}

/// A status reply packet
pub fn status_packet(id: ReqId, code: StatusCode) -> SftpPacket<'static> {
    SftpPacket::Status(id, Status { code, message: code.message(), lang: STATUS_LANG })
}

/// Status reply for a failed request
pub fn error_packet(id: ReqId, e: &SftpError) -> SftpPacket<'static> {
    let code = StatusCode::from(e);
    match code {
        StatusCode::SSH_FX_EOF => trace!("req {} eof", id.0),
        _ => debug!("req {} failed: {e}, replying {code:?}", id.0),
    }
    status_packet(id, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftpwire::WireError;
    use std::io;

    fn code(e: SftpError) -> StatusCode {
        StatusCode::from(&e)
    }

    fn io_code(k: io::ErrorKind) -> StatusCode {
        code(io::Error::from(k).into())
    }

    #[test]
    fn io_kinds() {
        assert_eq!(io_code(ErrorKind::NotFound), StatusCode::SSH_FX_NO_SUCH_FILE);
        assert_eq!(
            io_code(ErrorKind::PermissionDenied),
            StatusCode::SSH_FX_PERMISSION_DENIED
        );
        assert_eq!(io_code(ErrorKind::AlreadyExists), StatusCode::SSH_FX_FAILURE);
        assert_eq!(io_code(ErrorKind::Other), StatusCode::SSH_FX_FAILURE);
        assert_eq!(io_code(ErrorKind::Unsupported), StatusCode::SSH_FX_OP_UNSUPPORTED);
    }

    #[test]
    fn engine_errors() {
        assert_eq!(code(SftpError::Eof), StatusCode::SSH_FX_EOF);
        assert_eq!(code(SftpError::UnknownHandle), StatusCode::SSH_FX_FAILURE);
        assert_eq!(code(SftpError::WrongHandleKind), StatusCode::SSH_FX_FAILURE);
        assert_eq!(code(SftpError::OutsideRoot), StatusCode::SSH_FX_PERMISSION_DENIED);
        assert_eq!(code(SftpError::NotSupported), StatusCode::SSH_FX_OP_UNSUPPORTED);
        assert_eq!(code(WireError::RanOut.into()), StatusCode::SSH_FX_BAD_MESSAGE);
    }

    #[test]
    fn packet() {
        let p = error_packet(ReqId(3), &SftpError::Eof);
        let SftpPacket::Status(id, st) = p else { panic!() };
        assert_eq!(id, ReqId(3));
        assert_eq!(st.code, StatusCode::SSH_FX_EOF);
        assert_eq!(st.message, "End of file");
        assert_eq!(st.lang, "en");
    }
}
