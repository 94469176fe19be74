//! The open handle table of a session.
//!
//! Handles own the backend resources (`F` for files, `D` for directories)
//! so a resource can only be released by freeing its handle.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::collections::HashMap;

use crate::proto::FileHandle;
use crate::sftperror::{self as error, SftpResult};
use crate::sftpwire::BinString;

const HANDLE_LEN: usize = core::mem::size_of::<u64>();

/// The opaque id sent to the client. An 8 byte big endian counter value.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct HandleId {
    raw: [u8; HANDLE_LEN],
}

impl HandleId {
    fn new(counter: u64) -> Self {
        HandleId { raw: counter.to_be_bytes() }
    }

    /// Fails with `UnknownHandle` for any length but 8, those can't have
    /// been issued by this table.
    pub fn try_from(file_handle: &FileHandle<'_>) -> SftpResult<Self> {
        let raw: [u8; HANDLE_LEN] = file_handle.0 .0
            .try_into()
            .map_err(|_| error::UnknownHandle.build())?;
        Ok(HandleId { raw })
    }

    pub fn into_file_handle(&self) -> FileHandle<'_> {
        FileHandle(BinString(&self.raw))
    }

    fn counter(&self) -> u64 {
        u64::from_be_bytes(self.raw)
    }
}

/// Position of a directory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirCursor {
    /// Nothing returned yet, `.` and `..` are still to be sent
    Fresh,
    /// Part way through the backend's entries
    Listing,
    /// The backend reported the end. Stays here.
    Exhausted,
}

#[derive(Debug)]
pub enum Resource<F, D> {
    File(F),
    Dir { dir: D, cursor: DirCursor },
}

/// An open file or directory
#[derive(Debug)]
pub struct Handle<F, D> {
    /// Path as the client opened it, passed to hooks and used for
    /// path based fallbacks on directory handles
    pub path: Vec<u8>,
    pub resource: Resource<F, D>,
}

impl<F, D> Handle<F, D> {
    /// The path and file of a file handle
    pub fn file_mut(&mut self) -> SftpResult<(&[u8], &mut F)> {
        match &mut self.resource {
            Resource::File(f) => Ok((&self.path, f)),
            Resource::Dir { .. } => error::WrongHandleKind.fail(),
        }
    }

    /// The path, directory and listing position of a directory handle
    pub fn dir_mut(&mut self) -> SftpResult<(&[u8], &mut D, &mut DirCursor)> {
        match &mut self.resource {
            Resource::Dir { dir, cursor } => Ok((&self.path, dir, cursor)),
            Resource::File(_) => error::WrongHandleKind.fail(),
        }
    }
}

/// Maps issued handle ids to open resources.
///
/// Ids come from a counter that only increases, so an id is never
/// reissued within a session even after it is freed.
#[derive(Debug)]
pub struct HandleTable<F, D> {
    next: u64,
    handles: HashMap<u64, Handle<F, D>>,
}

impl<F, D> Default for HandleTable<F, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F, D> HandleTable<F, D> {
    pub fn new() -> Self {
        HandleTable { next: 0, handles: HashMap::new() }
    }

    pub fn allocate(&mut self, path: &[u8], resource: Resource<F, D>) -> HandleId {
        let id = HandleId::new(self.next);
        self.next += 1;
        let prev = self
            .handles
            .insert(id.counter(), Handle { path: path.to_vec(), resource });
        debug_assert!(prev.is_none());
        trace!("allocated handle {}, {} open", id.counter(), self.handles.len());
        id
    }

    pub fn allocate_file(&mut self, path: &[u8], file: F) -> HandleId {
        self.allocate(path, Resource::File(file))
    }

    pub fn allocate_dir(&mut self, path: &[u8], dir: D) -> HandleId {
        self.allocate(path, Resource::Dir { dir, cursor: DirCursor::Fresh })
    }

    pub fn resolve_mut(&mut self, fh: &FileHandle) -> SftpResult<&mut Handle<F, D>> {
        let id = HandleId::try_from(fh)?;
        self.handles
            .get_mut(&id.counter())
            .ok_or_else(|| error::UnknownHandle.build())
    }

    /// Removes the handle, the caller becomes responsible for releasing
    /// the returned resource.
    pub fn free(&mut self, fh: &FileHandle) -> SftpResult<Handle<F, D>> {
        let id = HandleId::try_from(fh)?;
        let h = self
            .handles
            .remove(&id.counter())
            .ok_or_else(|| error::UnknownHandle.build())?;
        trace!("freed handle {}, {} open", id.counter(), self.handles.len());
        Ok(h)
    }

    /// Removes all handles, at session end
    pub fn drain(&mut self) -> Vec<Handle<F, D>> {
        let mut ids: Vec<u64> = self.handles.keys().copied().collect();
        // release in the order they were opened
        ids.sort_unstable();
        ids.into_iter().filter_map(|i| self.handles.remove(&i)).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftperror::SftpError;
    use std::collections::HashSet;

    type Table = HandleTable<u32, &'static str>;

    #[test]
    fn ids_distinct() {
        let mut t = Table::new();
        let mut seen = HashSet::new();
        for i in 0..50 {
            let id = if i % 2 == 0 {
                t.allocate_file(b"f", i)
            } else {
                t.allocate_dir(b"d", "dir")
            };
            assert!(seen.insert(id));
        }
        assert_eq!(t.len(), 50);
    }

    #[test]
    fn not_reused_after_free() {
        let mut t = Table::new();
        let a = t.allocate_file(b"a", 1);
        let h = t.free(&a.into_file_handle()).unwrap();
        assert!(matches!(h.resource, Resource::File(1)));
        let b = t.allocate_file(b"a", 2);
        assert_ne!(a, b);
        assert!(t.resolve_mut(&a.into_file_handle()).is_err());
    }

    #[test]
    fn double_free() {
        let mut t = Table::new();
        let a = t.allocate_file(b"a", 1);
        t.free(&a.into_file_handle()).unwrap();
        let e = t.free(&a.into_file_handle()).unwrap_err();
        assert!(matches!(e, SftpError::UnknownHandle));
        assert!(t.is_empty());
    }

    #[test]
    fn bad_length_handle() {
        let mut t = Table::new();
        let fh = FileHandle(BinString(b"xyz"));
        assert!(matches!(t.resolve_mut(&fh).unwrap_err(), SftpError::UnknownHandle));
        let fh = FileHandle(BinString(&[0u8; 8]));
        assert!(matches!(t.resolve_mut(&fh).unwrap_err(), SftpError::UnknownHandle));
    }

    #[test]
    fn kinds() {
        let mut t = Table::new();
        let f = t.allocate_file(b"/file", 7);
        let d = t.allocate_dir(b"/dir", "x");
        let fh = f.into_file_handle();
        let dh = d.into_file_handle();

        assert!(matches!(
            t.resolve_mut(&fh).unwrap().dir_mut().unwrap_err(),
            SftpError::WrongHandleKind
        ));
        let (path, f) = t.resolve_mut(&fh).unwrap().file_mut().unwrap();
        assert_eq!((path, *f), (&b"/file"[..], 7));
        let (path, _, cursor) = t.resolve_mut(&dh).unwrap().dir_mut().unwrap();
        assert_eq!(path, b"/dir");
        assert_eq!(*cursor, DirCursor::Fresh);
        *cursor = DirCursor::Exhausted;
        let (_, _, cursor) = t.resolve_mut(&dh).unwrap().dir_mut().unwrap();
        assert_eq!(*cursor, DirCursor::Exhausted);
    }

    #[test]
    fn drain_in_open_order() {
        let mut t = Table::new();
        for i in 0..5 {
            t.allocate_file(b"f", i);
        }
        let drained: Vec<u32> = t
            .drain()
            .into_iter()
            .map(|h| match h.resource {
                Resource::File(f) => f,
                Resource::Dir { .. } => panic!(),
            })
            .collect();
        assert_eq!(drained, [0, 1, 2, 3, 4]);
        assert!(t.is_empty());
    }
}
