//! A [`SftpServer`] on the local filesystem, confined to a root directory.
//!
//! Client paths are taken relative to the root whether or not they start
//! with `/`. `..` stops at the root, and paths reaching outside the root
//! through symlinks are refused with `SSH_FX_PERMISSION_DENIED`.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::ffi::OsStr;
use std::fs::{self, File, FileTimes, Metadata, OpenOptions, Permissions, ReadDir};
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{
    chown, fchown, symlink, DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt,
    PermissionsExt,
};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;

use crate::attrs::Attrs;
use crate::config::SftpConfig;
use crate::proto::OpenFlags;
use crate::sftperror::{self as error, SftpResult};
use crate::sftpserver::{DirEntry, SftpServer};

// Only permission bits can be set, the type bits come from the file
const MODE_MASK: u32 = 0o7777;
const DEFAULT_FILE_MODE: u32 = 0o666;
const DEFAULT_DIR_MODE: u32 = 0o777;

#[derive(Debug)]
pub struct LocalFile {
    file: File,
}

#[derive(Debug)]
pub struct LocalDir {
    entries: ReadDir,
}

#[derive(Debug)]
pub struct LocalServer {
    root: PathBuf,
    readdir_batch: usize,
}

impl LocalServer {
    /// `root` must exist, it is canonicalized once here
    pub fn new(root: impl AsRef<Path>, config: &SftpConfig) -> SftpResult<Self> {
        let root = fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(std::io::Error::from(ErrorKind::NotADirectory).into());
        }
        debug!("serving {}", root.display());
        Ok(Self { root, readdir_batch: config.readdir_batch.max(1) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path's components below the root, with `.` removed and `..`
    /// applied lexically, never going above the root.
    fn clamp(path: &[u8]) -> Vec<&OsStr> {
        let mut parts: Vec<&OsStr> = vec![];
        for c in Path::new(OsStr::from_bytes(path)).components() {
            match c {
                Component::Normal(n) => parts.push(n),
                Component::ParentDir => {
                    parts.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => (),
            }
        }
        parts
    }

    /// Maps a client path to a local path.
    ///
    /// The parent directory must be inside the root. With `follow` the
    /// final component must resolve inside the root too, if it exists.
    fn local(&self, path: &[u8], follow: bool) -> SftpResult<PathBuf> {
        let mut full = self.root.clone();
        full.extend(Self::clamp(path));

        if let Some(parent) = full.parent() {
            if full != self.root {
                self.check_inside(parent)?;
            }
        }
        if follow {
            self.check_inside(&full)?;
        }
        trace!("{:?} -> {}", OsStr::from_bytes(path), full.display());
        Ok(full)
    }

    /// Checks the deepest existing ancestor of `p`, symlinks resolved,
    /// lies within the root.
    fn check_inside(&self, p: &Path) -> SftpResult<()> {
        let mut a = p;
        loop {
            match fs::canonicalize(a) {
                Ok(c) => {
                    if c.starts_with(&self.root) {
                        return Ok(());
                    } else {
                        debug!("{} escapes root", p.display());
                        return error::OutsideRoot.fail();
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => match a.parent() {
                    Some(up) => a = up,
                    None => return error::OutsideRoot.fail(),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Absolute client path of a local path within the root
    fn client_path(&self, p: &Path) -> Vec<u8> {
        let rel = p.strip_prefix(&self.root).unwrap_or(Path::new(""));
        let mut out = vec![];
        for c in rel.components() {
            out.push(b'/');
            out.extend_from_slice(c.as_os_str().as_bytes());
        }
        if out.is_empty() {
            out.push(b'/');
        }
        out
    }
}

pub fn attrs_from_metadata(m: &Metadata) -> Attrs {
    // v3 times are u32, clamp rather than wrap
    let time = |t: i64| t.clamp(0, u32::MAX as i64) as u32;
    Attrs {
        size: Some(m.size()),
        uid: Some(m.uid()),
        gid: Some(m.gid()),
        permissions: Some(m.mode()),
        atime: Some(time(m.atime())),
        mtime: Some(time(m.mtime())),
        extended: vec![],
    }
}

fn file_times(attrs: &Attrs) -> Option<FileTimes> {
    let (atime, mtime) = attrs.atime.zip(attrs.mtime)?;
    let t = |s: u32| -> SystemTime { UNIX_EPOCH + Duration::from_secs(s as u64) };
    Some(FileTimes::new().set_accessed(t(atime)).set_modified(t(mtime)))
}

impl SftpServer for LocalServer {
    type File = LocalFile;
    type Dir = LocalDir;

    fn open(
        &mut self,
        path: &[u8],
        flags: OpenFlags,
        attrs: &Attrs,
    ) -> SftpResult<LocalFile> {
        let p = self.local(path, true)?;

        let mut write = flags.write() || flags.append();
        // std requires write access to create or truncate, which the
        // OS doesn't
        if !write && (flags.creat() || flags.trunc()) {
            write = true;
        }
        let read = flags.read() || !write;

        let mut o = OpenOptions::new();
        o.read(read).write(write).append(flags.append());
        if flags.creat() {
            if flags.excl() {
                o.create_new(true);
            } else {
                o.create(true);
            }
        }
        o.truncate(flags.trunc());
        o.mode(attrs.permissions.map_or(DEFAULT_FILE_MODE, |m| m & MODE_MASK));

        let file = o.open(&p)?;
        if file.metadata()?.is_dir() {
            return Err(std::io::Error::from(ErrorKind::IsADirectory).into());
        }
        Ok(LocalFile { file })
    }

    fn close_file(&mut self, file: LocalFile) -> SftpResult<()> {
        drop(file);
        Ok(())
    }

    fn read(
        &mut self,
        file: &mut LocalFile,
        offset: u64,
        len: u32,
    ) -> SftpResult<Vec<u8>> {
        // Offsets past the end are EOF whatever the length, read_at
        // would also reject offsets above i64::MAX
        let size = file.file.metadata()?.len();
        if offset >= size {
            return error::Eof.fail();
        }

        let mut buf = vec![0u8; len as usize];
        let mut pos = 0;
        while pos < buf.len() {
            match file.file.read_at(&mut buf[pos..], offset + pos as u64) {
                Ok(0) => break,
                Ok(n) => pos += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if pos == 0 && len > 0 {
            // truncated since the size check
            return error::Eof.fail();
        }
        buf.truncate(pos);
        Ok(buf)
    }

    fn write(&mut self, file: &mut LocalFile, offset: u64, data: &[u8]) -> SftpResult<()> {
        file.file.write_all_at(data, offset)?;
        Ok(())
    }

    fn fstat(&mut self, file: &mut LocalFile) -> SftpResult<Attrs> {
        Ok(attrs_from_metadata(&file.file.metadata()?))
    }

    fn fsetstat(&mut self, file: &mut LocalFile, attrs: &Attrs) -> SftpResult<()> {
        let f = &file.file;
        if let Some(size) = attrs.size {
            if f.metadata()?.len() != size {
                f.set_len(size)?;
            }
        }
        if let Some(perm) = attrs.permissions {
            f.set_permissions(Permissions::from_mode(perm & MODE_MASK))?;
        }
        if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
            fchown(f, Some(uid), Some(gid))?;
        }
        if let Some(times) = file_times(attrs) {
            f.set_times(times)?;
        }
        Ok(())
    }

    fn stat(&mut self, path: &[u8], follow: bool) -> SftpResult<Attrs> {
        let p = self.local(path, follow)?;
        let m = if follow { fs::metadata(&p)? } else { fs::symlink_metadata(&p)? };
        Ok(attrs_from_metadata(&m))
    }

    fn setstat(&mut self, path: &[u8], attrs: &Attrs) -> SftpResult<()> {
        let p = self.local(path, true)?;
        if let Some(size) = attrs.size {
            // Only truncate when needed, it would touch mtime
            if fs::metadata(&p)?.len() != size {
                OpenOptions::new().write(true).open(&p)?.set_len(size)?;
            }
        }
        if let Some(perm) = attrs.permissions {
            fs::set_permissions(&p, Permissions::from_mode(perm & MODE_MASK))?;
        }
        if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
            chown(&p, Some(uid), Some(gid))?;
        }
        if let (Some(atime), Some(mtime)) = (attrs.atime, attrs.mtime) {
            // By path, opening a FIFO would block and opening needs read
            // permission
            filetime::set_file_times(
                &p,
                FileTime::from_unix_time(atime.into(), 0),
                FileTime::from_unix_time(mtime.into(), 0),
            )?;
        }
        Ok(())
    }

    fn opendir(&mut self, path: &[u8]) -> SftpResult<LocalDir> {
        let p = self.local(path, true)?;
        Ok(LocalDir { entries: fs::read_dir(p)? })
    }

    fn readdir(&mut self, dir: &mut LocalDir) -> SftpResult<Vec<DirEntry>> {
        let mut batch = vec![];
        while batch.len() < self.readdir_batch {
            let Some(ent) = dir.entries.next() else {
                break;
            };
            let ent = match ent {
                Ok(ent) => ent,
                // Send what was listed before the error
                Err(e) if !batch.is_empty() => {
                    debug!("readdir stopped early: {e}");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            // Entries can vanish between listing and stat
            let attrs = match ent.path().symlink_metadata() {
                Ok(m) => attrs_from_metadata(&m),
                Err(e) => {
                    debug!("skipping {:?}: {e}", ent.file_name());
                    continue;
                }
            };
            batch.push(DirEntry { filename: ent.file_name().as_bytes().to_vec(), attrs });
        }

        if batch.is_empty() {
            return error::Eof.fail();
        }
        Ok(batch)
    }

    fn close_dir(&mut self, dir: LocalDir) -> SftpResult<()> {
        drop(dir);
        Ok(())
    }

    fn mkdir(&mut self, path: &[u8], attrs: &Attrs) -> SftpResult<()> {
        let p = self.local(path, false)?;
        fs::DirBuilder::new()
            .mode(attrs.permissions.map_or(DEFAULT_DIR_MODE, |m| m & MODE_MASK))
            .create(p)?;
        Ok(())
    }

    fn rmdir(&mut self, path: &[u8]) -> SftpResult<()> {
        let p = self.local(path, false)?;
        if p == self.root {
            return error::OutsideRoot.fail();
        }
        fs::remove_dir(p)?;
        Ok(())
    }

    fn remove(&mut self, path: &[u8]) -> SftpResult<()> {
        let p = self.local(path, false)?;
        fs::remove_file(p)?;
        Ok(())
    }

    /// Fails if `newpath` exists, as draft-02 requires
    fn rename(&mut self, oldpath: &[u8], newpath: &[u8]) -> SftpResult<()> {
        let old = self.local(oldpath, false)?;
        let new = self.local(newpath, false)?;
        if old == self.root || new == self.root {
            return error::OutsideRoot.fail();
        }
        if new.symlink_metadata().is_ok() {
            return Err(std::io::Error::from(ErrorKind::AlreadyExists).into());
        }
        fs::rename(old, new)?;
        Ok(())
    }

    fn symlink(&mut self, linkpath: &[u8], targetpath: &[u8]) -> SftpResult<()> {
        let link = self.local(linkpath, false)?;
        // The target is stored as given, following it is checked on use
        symlink(OsStr::from_bytes(targetpath), link)?;
        Ok(())
    }

    fn readlink(&mut self, path: &[u8]) -> SftpResult<Vec<u8>> {
        let p = self.local(path, false)?;
        Ok(fs::read_link(p)?.into_os_string().as_bytes().to_vec())
    }

    fn realpath(&mut self, path: &[u8]) -> SftpResult<Vec<u8>> {
        let p = self.local(path, true)?;
        let canon = match fs::canonicalize(&p) {
            Ok(c) => c,
            // Clients ask for paths they are about to create
            Err(e) if e.kind() == ErrorKind::NotFound => p,
            Err(e) => return Err(e.into()),
        };
        Ok(self.client_path(&canon))
    }
}
