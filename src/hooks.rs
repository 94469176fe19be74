//! Observers notified of each request.
//!
//! A hook is called before the storage backend runs the operation, with
//! handles already resolved to the path they were opened with. Whatever a
//! hook returns, or if it panics, the reply to the client is unaffected.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::panic::{catch_unwind, AssertUnwindSafe};

use snafu::prelude::*;

use crate::attrs::Attrs;
use crate::proto::OpenFlags;
use crate::sftpwire::Filename;

pub type HookResult<T> = core::result::Result<T, HookError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HookError {
    #[snafu(display("Hook request failed: {msg}"))]
    Request { msg: String },
    #[snafu(display("Hook panicked"))]
    Panicked,
    Fail,
}

/// One method per request type. All default to doing nothing.
#[allow(unused_variables)]
pub trait SftpHook {
    /// After `SSH_FXP_VERSION` is sent
    fn init(&mut self) -> HookResult<()> {
        Ok(())
    }

    fn realpath(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn stat(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn lstat(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn fstat(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn setstat(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        Ok(())
    }

    fn fsetstat(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        Ok(())
    }

    fn opendir(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn readdir(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn close(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn open(
        &mut self,
        filename: &[u8],
        flags: OpenFlags,
        attrs: &Attrs,
    ) -> HookResult<()> {
        Ok(())
    }

    fn read(&mut self, filename: &[u8], offset: u64, size: u32) -> HookResult<()> {
        Ok(())
    }

    fn write(&mut self, filename: &[u8], offset: u64, chunk: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn mkdir(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        Ok(())
    }

    fn rmdir(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn remove(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn rename(&mut self, oldpath: &[u8], newpath: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn symlink(&mut self, linkpath: &[u8], targetpath: &[u8]) -> HookResult<()> {
        Ok(())
    }

    fn readlink(&mut self, filename: &[u8]) -> HookResult<()> {
        Ok(())
    }
}

/// Runs a hook call, absorbing failures and panics.
pub(crate) fn call_hook<F>(op: &str, f: F)
where
    F: FnOnce() -> HookResult<()>,
{
    let r = catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| PanickedSnafu.fail());
    if let Err(e) = r {
        warn!("{op} hook: {e}");
    }
}

/// Does nothing
#[derive(Debug, Default)]
pub struct NoHook;

impl SftpHook for NoHook {}

/// Writes an `info` log record for every operation
#[derive(Debug, Default)]
pub struct LogHook;

impl SftpHook for LogHook {
    fn init(&mut self) -> HookResult<()> {
        info!("init");
        Ok(())
    }

    fn realpath(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("realpath {:?}", Filename(filename));
        Ok(())
    }

    fn stat(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("stat {:?}", Filename(filename));
        Ok(())
    }

    fn lstat(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("lstat {:?}", Filename(filename));
        Ok(())
    }

    fn fstat(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("fstat {:?}", Filename(filename));
        Ok(())
    }

    fn setstat(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        info!("setstat {:?} {attrs:?}", Filename(filename));
        Ok(())
    }

    fn fsetstat(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        info!("fsetstat {:?} {attrs:?}", Filename(filename));
        Ok(())
    }

    fn opendir(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("opendir {:?}", Filename(filename));
        Ok(())
    }

    fn readdir(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("readdir {:?}", Filename(filename));
        Ok(())
    }

    fn close(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("close {:?}", Filename(filename));
        Ok(())
    }

    fn open(
        &mut self,
        filename: &[u8],
        flags: OpenFlags,
        attrs: &Attrs,
    ) -> HookResult<()> {
        info!("open {:?} flags {:#x} {attrs:?}", Filename(filename), flags.0);
        Ok(())
    }

    fn read(&mut self, filename: &[u8], offset: u64, size: u32) -> HookResult<()> {
        info!("read {:?} offset {offset} size {size}", Filename(filename));
        Ok(())
    }

    fn write(&mut self, filename: &[u8], offset: u64, chunk: &[u8]) -> HookResult<()> {
        info!("write {:?} offset {offset} len {}", Filename(filename), chunk.len());
        Ok(())
    }

    fn mkdir(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        info!("mkdir {:?} {attrs:?}", Filename(filename));
        Ok(())
    }

    fn rmdir(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("rmdir {:?}", Filename(filename));
        Ok(())
    }

    fn remove(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("remove {:?}", Filename(filename));
        Ok(())
    }

    fn rename(&mut self, oldpath: &[u8], newpath: &[u8]) -> HookResult<()> {
        info!("rename {:?} -> {:?}", Filename(oldpath), Filename(newpath));
        Ok(())
    }

    fn symlink(&mut self, linkpath: &[u8], targetpath: &[u8]) -> HookResult<()> {
        info!("symlink {:?} -> {:?}", Filename(linkpath), Filename(targetpath));
        Ok(())
    }

    fn readlink(&mut self, filename: &[u8]) -> HookResult<()> {
        info!("readlink {:?}", Filename(filename));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftplog::init_test_log;

    #[test]
    fn absorbs_error() {
        init_test_log();
        let mut ran = false;
        call_hook("stat", || {
            ran = true;
            FailSnafu.fail()
        });
        assert!(ran);
    }

    #[test]
    fn absorbs_panic() {
        init_test_log();
        call_hook("stat", || panic!("hook blew up"));
    }

    #[test]
    fn log_hook() {
        init_test_log();
        let mut h = LogHook;
        h.open(b"a\xff", OpenFlags(OpenFlags::READ), &Attrs::default()).unwrap();
        h.write(b"a", 10, b"data").unwrap();
        h.rename(b"a", b"b").unwrap();
    }
}
