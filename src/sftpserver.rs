#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use crate::attrs::Attrs;
use crate::proto::OpenFlags;
use crate::sftperror::{self as error, SftpResult};

/// A directory entry returned by [`SftpServer::readdir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub filename: Vec<u8>,
    pub attrs: Attrs,
}

/// The storage backend a session operates on.
///
/// Paths are the raw bytes sent by the client. Files and directories
/// opened by the backend are owned by the session's handle table and given
/// back exactly once with [`close_file`](Self::close_file) or
/// [`close_dir`](Self::close_dir), including at the end of a session.
///
/// All trait functions are optional in the SFTP protocol.
/// Some less core operations have a Provided implementation returning
/// [`SftpError::NotSupported`](crate::SftpError::NotSupported), sent as
/// `SSH_FX_OP_UNSUPPORTED`.
pub trait SftpServer {
    type File;
    type Dir;

    fn open(
        &mut self,
        path: &[u8],
        flags: OpenFlags,
        attrs: &Attrs,
    ) -> SftpResult<Self::File>;

    /// Releases an open file. The file is gone whether or not this fails.
    fn close_file(&mut self, file: Self::File) -> SftpResult<()>;

    /// Reads up to `len` bytes. Returns `Err(SftpError::Eof)` when `offset`
    /// is at or past the end of the file, a short read is not an error.
    fn read(
        &mut self,
        file: &mut Self::File,
        offset: u64,
        len: u32,
    ) -> SftpResult<Vec<u8>>;

    fn write(&mut self, file: &mut Self::File, offset: u64, data: &[u8])
        -> SftpResult<()>;

    fn fstat(&mut self, file: &mut Self::File) -> SftpResult<Attrs>;

    /// Applies only the fields present in `attrs`
    fn fsetstat(&mut self, _file: &mut Self::File, _attrs: &Attrs) -> SftpResult<()> {
        error::NotSupported.fail()
    }

    /// `follow` is false for `SSH_FXP_LSTAT`
    fn stat(&mut self, path: &[u8], follow: bool) -> SftpResult<Attrs>;

    /// Applies only the fields present in `attrs`
    fn setstat(&mut self, _path: &[u8], _attrs: &Attrs) -> SftpResult<()> {
        error::NotSupported.fail()
    }

    fn opendir(&mut self, path: &[u8]) -> SftpResult<Self::Dir>;

    /// Returns the next batch of entries, excluding `.` and `..`.
    /// Returns `Err(SftpError::Eof)` once there are no more.
    fn readdir(&mut self, dir: &mut Self::Dir) -> SftpResult<Vec<DirEntry>>;

    fn close_dir(&mut self, dir: Self::Dir) -> SftpResult<()>;

    fn mkdir(&mut self, _path: &[u8], _attrs: &Attrs) -> SftpResult<()> {
        error::NotSupported.fail()
    }

    fn rmdir(&mut self, _path: &[u8]) -> SftpResult<()> {
        error::NotSupported.fail()
    }

    fn remove(&mut self, _path: &[u8]) -> SftpResult<()> {
        error::NotSupported.fail()
    }

    fn rename(&mut self, _oldpath: &[u8], _newpath: &[u8]) -> SftpResult<()> {
        error::NotSupported.fail()
    }

    /// Creates `linkpath` pointing at `targetpath`
    fn symlink(&mut self, _linkpath: &[u8], _targetpath: &[u8]) -> SftpResult<()> {
        error::NotSupported.fail()
    }

    /// The link target, unmodified
    fn readlink(&mut self, _path: &[u8]) -> SftpResult<Vec<u8>> {
        error::NotSupported.fail()
    }

    /// An absolute canonical form of `path`
    fn realpath(&mut self, path: &[u8]) -> SftpResult<Vec<u8>>;
}
