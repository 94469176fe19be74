#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::io::{Read, Write};

use crate::attrs::Attrs;
use crate::config::{SftpConfig, SFTP_VERSION};
use crate::handles::{DirCursor, Handle, HandleId, HandleTable, Resource};
use crate::hooks::{call_hook, NoHook, SftpHook};
use crate::packet::{read_packet, write_packet};
use crate::proto::{
    self, Data, InitVersionLowest, Name, NameEntry, ReqId, ResponseAttributes,
    SftpNum, SftpPacket, StatusCode,
};
use crate::sftperror::{self as error, SftpError, SftpResult};
use crate::sftpserver::{DirEntry, SftpServer};
use crate::sftpwire::{BinString, DecodeBytes, Filename, SftpSource, WireError};
use crate::status::{error_packet, status_packet};

/// FSM for handling sftp requests during [`SftpHandler::process`]
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub enum SftpHandleState {
    /// Waiting for `SSH_FXP_INIT`
    #[default]
    AwaitingInit,
    /// The handle is ready to process requests
    Ready,
    /// The input ended or a fatal error occurred
    Closed,
}

/// An entry of a `SSH_FXP_NAME` reply
#[derive(Debug)]
struct NameReply {
    filename: Vec<u8>,
    longname: Vec<u8>,
    attrs: Attrs,
}

impl NameReply {
    /// For REALPATH and READLINK, the long name is the name itself
    fn single(filename: Vec<u8>) -> Self {
        Self { longname: filename.clone(), filename, attrs: Attrs::default() }
    }

    fn listing(filename: Vec<u8>, attrs: Attrs) -> Self {
        Self { longname: attrs.long_listing(&filename), filename, attrs }
    }
}

/// Successful outcome of a request, before encoding
#[derive(Debug)]
enum Reply {
    Ok,
    Handle(HandleId),
    Data(Vec<u8>),
    Name(Vec<NameReply>),
    Attrs(Attrs),
}

/// Runs a session, decoding requests and encoding responses.
///
/// Requests are delegated to a [`SftpServer`] storage backend, with a
/// [`SftpHook`] notified before each one.
pub struct SftpHandler<S: SftpServer> {
    /// Holds the internal state if the SFTP handle
    state: SftpHandleState,

    /// The storage backend implementing the SFTP requests
    file_server: S,

    handles: HandleTable<S::File, S::Dir>,

    hook: Box<dyn SftpHook>,

    config: SftpConfig,
}

impl<S: SftpServer> SftpHandler<S> {
    pub fn new(file_server: S, config: SftpConfig) -> Self {
        SftpHandler {
            state: SftpHandleState::default(),
            file_server,
            handles: HandleTable::new(),
            hook: Box::new(NoHook),
            config,
        }
    }

    pub fn with_hook(mut self, hook: impl SftpHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn state(&self) -> SftpHandleState {
        self.state
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn file_server(&mut self) -> &mut S {
        &mut self.file_server
    }

    /// Processes requests from `input` until it ends.
    ///
    /// Returns `Ok` when the input ends between packets, or the fatal error
    /// that ended the session. Either way handles still open are released.
    pub fn process_loop<R: Read, W: Write>(
        &mut self,
        input: &mut R,
        output: &mut W,
    ) -> SftpResult<()> {
        let r = self.run(input, output);
        self.state = SftpHandleState::Closed;
        self.release_all();
        match &r {
            Ok(()) => debug!("client disconnected"),
            Err(e) => error!("session ended: {e}"),
        }
        r
    }

    fn run<R: Read, W: Write>(&mut self, input: &mut R, output: &mut W) -> SftpResult<()> {
        loop {
            let Some(payload) = read_packet(input, self.config.max_packet_len)? else {
                return Ok(());
            };
            self.process(&payload, output)?;
        }
    }

    /// Handles one packet payload, writing the reply.
    ///
    /// Only fatal errors are returned, request failures are replied with
    /// a status.
    pub fn process<W: Write>(&mut self, payload: &[u8], output: &mut W) -> SftpResult<()> {
        let mut source = DecodeBytes::new(payload);
        trace!("SFTP Process State: {:?}", self.state);

        match self.state {
            SftpHandleState::AwaitingInit => match SftpPacket::decode_request(&mut source) {
                Ok(SftpPacket::Init(init)) => {
                    debug!("client version {}", init.version);
                    let version =
                        SftpPacket::Version(InitVersionLowest { version: SFTP_VERSION });
                    write_packet(output, &version)?;
                    self.state = SftpHandleState::Ready;
                    call_hook("init", || self.hook.init());
                    Ok(())
                }
                Ok(request) => {
                    error!("Request received before init: {:?}", request.sftp_num());
                    error::NotInitialized.fail()
                }
                Err(e) => {
                    error!("Malformed SFTP Packet before Init: {e}");
                    if matches!(source.peek_packet_type().map(SftpNum::from), Ok(SftpNum::SSH_FXP_INIT)) {
                        error::MalformedPacket.fail()
                    } else {
                        error::NotInitialized.fail()
                    }
                }
            },
            SftpHandleState::Ready => match SftpPacket::decode_request(&mut source) {
                Ok(request) => {
                    if source.remaining() > 0 {
                        debug!(
                            "{} trailing bytes after {:?}",
                            source.remaining(),
                            request.sftp_num()
                        );
                    }
                    self.handle_general_request(request, output)
                }
                Err(e) => Self::handle_decode_error(&source, e, output),
            },
            SftpHandleState::Closed => {
                // a closed session doesn't restart
                error::NotInitialized.fail()
            }
        }
    }

    /// Answers an undecodable request with `SSH_FX_BAD_MESSAGE`, if there
    /// is a request id to answer
    fn handle_decode_error<W: Write>(
        source: &DecodeBytes,
        e: WireError,
        output: &mut W,
    ) -> SftpResult<()> {
        let num = source.peek_packet_type().map(SftpNum::from);
        match (num, source.peek_req_id()) {
            (Ok(SftpNum::SSH_FXP_INIT), _) => {
                error!("Malformed init after the session started");
                error::AlreadyInitialized.fail()
            }
            (Ok(num), Ok(id)) => {
                warn!("Error decoding {num:?} request {id}: {e}");
                write_packet(output, &error_packet(ReqId(id), &e.into()))
            }
            _ => {
                error!("Packet too short for a request id: {e}");
                error::MalformedPacket.fail()
            }
        }
    }

    fn handle_general_request<W: Write>(
        &mut self,
        request: SftpPacket<'_>,
        output: &mut W,
    ) -> SftpResult<()> {
        debug!("Handling general request: {:?}", request);
        let Some(req_id) = request.req_id() else {
            // INIT or VERSION, no request id to answer
            error!("Unexpected {:?} after init", request.sftp_num());
            return error::AlreadyInitialized.fail();
        };

        let reply = self.dispatch(request);
        Self::send_reply(output, req_id, reply)
    }

    fn dispatch(&mut self, request: SftpPacket<'_>) -> SftpResult<Reply> {
        match request {
            SftpPacket::Open(_, open) => {
                let path = open.filename.as_bytes();
                call_hook("open", || self.hook.open(path, open.pflags, &open.attrs));
                let file = self.file_server.open(path, open.pflags, &open.attrs)?;
                Ok(Reply::Handle(self.handles.allocate_file(path, file)))
            }
            SftpPacket::Close(_, close) => {
                // The handle is gone even if the backend fails to close it
                let h = self.handles.free(&close.handle)?;
                call_hook("close", || self.hook.close(&h.path));
                self.release(h)?;
                Ok(Reply::Ok)
            }
            SftpPacket::Read(_, read) => {
                let len = read.len.min(self.config.max_read_len);
                let (path, file) = self.handles.resolve_mut(&read.handle)?.file_mut()?;
                call_hook("read", || self.hook.read(path, read.offset, len));
                let data = self.file_server.read(file, read.offset, len)?;
                Ok(Reply::Data(data))
            }
            SftpPacket::Write(_, write) => {
                let (path, file) = self.handles.resolve_mut(&write.handle)?.file_mut()?;
                call_hook("write", || self.hook.write(path, write.offset, write.data.0));
                self.file_server.write(file, write.offset, write.data.0)?;
                Ok(Reply::Ok)
            }
            SftpPacket::Lstat(_, lstat) => {
                let path = lstat.path.as_bytes();
                call_hook("lstat", || self.hook.lstat(path));
                Ok(Reply::Attrs(self.file_server.stat(path, false)?))
            }
            SftpPacket::Stat(_, stat) => {
                let path = stat.path.as_bytes();
                call_hook("stat", || self.hook.stat(path));
                Ok(Reply::Attrs(self.file_server.stat(path, true)?))
            }
            SftpPacket::Fstat(_, fstat) => {
                let h = self.handles.resolve_mut(&fstat.handle)?;
                let path = h.path.as_slice();
                call_hook("fstat", || self.hook.fstat(path));
                let attrs = match &mut h.resource {
                    Resource::File(f) => self.file_server.fstat(f)?,
                    Resource::Dir { .. } => self.file_server.stat(path, true)?,
                };
                Ok(Reply::Attrs(attrs))
            }
            SftpPacket::Setstat(_, setstat) => {
                let path = setstat.path.as_bytes();
                call_hook("setstat", || self.hook.setstat(path, &setstat.attrs));
                self.file_server.setstat(path, &setstat.attrs)?;
                Ok(Reply::Ok)
            }
            SftpPacket::Fsetstat(_, fsetstat) => {
                let attrs = &fsetstat.attrs;
                let h = self.handles.resolve_mut(&fsetstat.handle)?;
                let path = h.path.as_slice();
                call_hook("fsetstat", || self.hook.fsetstat(path, attrs));
                match &mut h.resource {
                    Resource::File(f) => self.file_server.fsetstat(f, attrs)?,
                    Resource::Dir { .. } => self.file_server.setstat(path, attrs)?,
                };
                Ok(Reply::Ok)
            }
            SftpPacket::Opendir(_, opendir) => {
                let path = opendir.path.as_bytes();
                call_hook("opendir", || self.hook.opendir(path));
                let dir = self.file_server.opendir(path)?;
                Ok(Reply::Handle(self.handles.allocate_dir(path, dir)))
            }
            SftpPacket::Readdir(_, readdir) => {
                let (path, dir, cursor) =
                    self.handles.resolve_mut(&readdir.handle)?.dir_mut()?;
                call_hook("readdir", || self.hook.readdir(path));

                let mut names = vec![];
                match *cursor {
                    DirCursor::Exhausted => return error::Eof.fail(),
                    DirCursor::Fresh => {
                        let mut parent = path.to_vec();
                        parent.extend_from_slice(b"/..");
                        // Still list the directory if these can't be stat-ed
                        let dot = self.file_server.stat(path, true).unwrap_or_default();
                        let dotdot = self.file_server.stat(&parent, true).unwrap_or_default();
                        names.push(NameReply::listing(b".".to_vec(), dot));
                        names.push(NameReply::listing(b"..".to_vec(), dotdot));
                    }
                    DirCursor::Listing => (),
                }

                // A failed first batch leaves the cursor Fresh, so `.` and
                // `..` are sent again with the next attempt
                match self.file_server.readdir(dir) {
                    Ok(entries) => {
                        *cursor = DirCursor::Listing;
                        names.extend(entries.into_iter().map(|DirEntry { filename, attrs }| {
                            NameReply::listing(filename, attrs)
                        }))
                    }
                    Err(SftpError::Eof) => {
                        *cursor = DirCursor::Exhausted;
                        if names.is_empty() {
                            return error::Eof.fail();
                        }
                    }
                    Err(e) => return Err(e),
                }
                Ok(Reply::Name(names))
            }
            SftpPacket::Remove(_, remove) => {
                let path = remove.filename.as_bytes();
                call_hook("remove", || self.hook.remove(path));
                self.file_server.remove(path)?;
                Ok(Reply::Ok)
            }
            SftpPacket::Mkdir(_, mkdir) => {
                let path = mkdir.path.as_bytes();
                call_hook("mkdir", || self.hook.mkdir(path, &mkdir.attrs));
                self.file_server.mkdir(path, &mkdir.attrs)?;
                Ok(Reply::Ok)
            }
            SftpPacket::Rmdir(_, rmdir) => {
                let path = rmdir.path.as_bytes();
                call_hook("rmdir", || self.hook.rmdir(path));
                self.file_server.rmdir(path)?;
                Ok(Reply::Ok)
            }
            SftpPacket::Realpath(_, realpath) => {
                let path = realpath.path.as_bytes();
                call_hook("realpath", || self.hook.realpath(path));
                let real = self.file_server.realpath(path)?;
                Ok(Reply::Name(vec![NameReply::single(real)]))
            }
            SftpPacket::Rename(_, rename) => {
                let (old, new) = (rename.oldpath.as_bytes(), rename.newpath.as_bytes());
                call_hook("rename", || self.hook.rename(old, new));
                self.file_server.rename(old, new)?;
                Ok(Reply::Ok)
            }
            SftpPacket::Readlink(_, readlink) => {
                let path = readlink.path.as_bytes();
                call_hook("readlink", || self.hook.readlink(path));
                let target = self.file_server.readlink(path)?;
                Ok(Reply::Name(vec![NameReply::single(target)]))
            }
            SftpPacket::Symlink(_, symlink) => {
                let (link, target) =
                    (symlink.linkpath.as_bytes(), symlink.targetpath.as_bytes());
                call_hook("symlink", || self.hook.symlink(link, target));
                self.file_server.symlink(link, target)?;
                Ok(Reply::Ok)
            }
            SftpPacket::Extended(_, ext) => {
                debug!("Unsupported extension {:?}", Filename(ext.request.0));
                error::NotSupported.fail()
            }
            SftpPacket::Init(_)
            | SftpPacket::Version(_)
            | SftpPacket::Status(..)
            | SftpPacket::Handle(..)
            | SftpPacket::Data(..)
            | SftpPacket::Name(..)
            | SftpPacket::Attrs(..) => {
                // decode_request only passes requests
                Err(WireError::PacketWrong.into())
            }
        }
    }

    fn send_reply<W: Write>(
        output: &mut W,
        req_id: ReqId,
        reply: SftpResult<Reply>,
    ) -> SftpResult<()> {
        match reply {
            Ok(Reply::Ok) => write_packet(output, &status_packet(req_id, StatusCode::SSH_FX_OK)),
            Ok(Reply::Handle(h)) => {
                let handle = proto::Handle { handle: h.into_file_handle() };
                write_packet(output, &SftpPacket::Handle(req_id, handle))
            }
            Ok(Reply::Data(data)) => {
                write_packet(output, &SftpPacket::Data(req_id, Data { data: BinString(&data) }))
            }
            Ok(Reply::Name(names)) => {
                let entries = names
                    .iter()
                    .map(|n| NameEntry {
                        filename: Filename(&n.filename),
                        longname: BinString(&n.longname),
                        attrs: n.attrs.clone(),
                    })
                    .collect();
                write_packet(output, &SftpPacket::Name(req_id, Name(entries)))
            }
            Ok(Reply::Attrs(attrs)) => write_packet(
                output,
                &SftpPacket::Attrs(req_id, ResponseAttributes { attrs }),
            ),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => write_packet(output, &error_packet(req_id, &e)),
        }
    }

    /// Gives a freed handle's resource back to the backend
    fn release(&mut self, h: Handle<S::File, S::Dir>) -> SftpResult<()> {
        match h.resource {
            Resource::File(f) => self.file_server.close_file(f),
            Resource::Dir { dir, .. } => self.file_server.close_dir(dir),
        }
    }

    fn release_all(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        debug!("releasing {} handles left open", self.handles.len());
        for h in self.handles.drain() {
            if let Err(e) = self.release(h) {
                warn!("Error closing at session end: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftplog::init_test_log;
    use crate::sftpwire::{read_sftp, sftp_push_vec};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// An in-memory backend with one file "f" and a directory "d"
    /// of `entries` names, recording releases.
    #[derive(Default)]
    struct MemServer {
        content: Vec<u8>,
        entries: Vec<Vec<u8>>,
        released: Rc<RefCell<Vec<String>>>,
        fail_close: bool,
        // readdir calls to fail before listing
        fail_readdir: usize,
    }

    impl SftpServer for MemServer {
        type File = String;
        type Dir = Vec<Vec<u8>>;

        fn open(&mut self, path: &[u8], _: proto::OpenFlags, _: &Attrs) -> SftpResult<String> {
            if path == b"f" {
                Ok("f".into())
            } else {
                Err(std::io::Error::from(std::io::ErrorKind::NotFound).into())
            }
        }

        fn close_file(&mut self, file: String) -> SftpResult<()> {
            self.released.borrow_mut().push(file);
            if self.fail_close {
                return Err(std::io::Error::other("close failed").into());
            }
            Ok(())
        }

        fn read(&mut self, _: &mut String, offset: u64, len: u32) -> SftpResult<Vec<u8>> {
            let start = offset as usize;
            if start >= self.content.len() {
                return error::Eof.fail();
            }
            let end = self.content.len().min(start + len as usize);
            Ok(self.content[start..end].to_vec())
        }

        fn write(&mut self, _: &mut String, _: u64, data: &[u8]) -> SftpResult<()> {
            self.content.extend_from_slice(data);
            Ok(())
        }

        fn fstat(&mut self, _: &mut String) -> SftpResult<Attrs> {
            Ok(Attrs { size: Some(self.content.len() as u64), ..Default::default() })
        }

        fn stat(&mut self, _: &[u8], _: bool) -> SftpResult<Attrs> {
            Ok(Attrs { permissions: Some(0o40755), ..Default::default() })
        }

        fn opendir(&mut self, _: &[u8]) -> SftpResult<Self::Dir> {
            Ok(self.entries.clone())
        }

        fn readdir(&mut self, dir: &mut Self::Dir) -> SftpResult<Vec<DirEntry>> {
            if self.fail_readdir > 0 {
                self.fail_readdir -= 1;
                return Err(std::io::Error::other("readdir failed").into());
            }
            if dir.is_empty() {
                return error::Eof.fail();
            }
            let take = dir.len().min(2);
            Ok(dir
                .drain(..take)
                .map(|filename| DirEntry { filename, attrs: Attrs::default() })
                .collect())
        }

        fn close_dir(&mut self, _: Self::Dir) -> SftpResult<()> {
            self.released.borrow_mut().push("dir".into());
            Ok(())
        }

        fn realpath(&mut self, path: &[u8]) -> SftpResult<Vec<u8>> {
            let mut p = b"/".to_vec();
            p.extend_from_slice(path);
            Ok(p)
        }
    }

    fn request(p: &SftpPacket) -> Vec<u8> {
        let mut v = vec![];
        sftp_push_vec(&mut v, p).unwrap();
        v
    }

    fn init(h: &mut SftpHandler<MemServer>) {
        let mut out = vec![];
        h.process(&[1, 0, 0, 0, 3], &mut out).unwrap();
        // length, VERSION, version 3
        assert_eq!(out, [0, 0, 0, 5, 2, 0, 0, 0, 3]);
        assert_eq!(h.state(), SftpHandleState::Ready);
    }

    /// Runs one request, returning the reply payload
    fn call(h: &mut SftpHandler<MemServer>, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![];
        h.process(payload, &mut out).unwrap();
        assert!(out.len() >= 4);
        out.split_off(4)
    }

    fn status_of(reply: &[u8]) -> (u32, StatusCode) {
        match read_sftp(reply).unwrap() {
            SftpPacket::Status(id, st) => (id.0, st.code),
            p => panic!("not a status: {p:?}"),
        }
    }

    fn handle_of(reply: &[u8]) -> Vec<u8> {
        match read_sftp(reply).unwrap() {
            SftpPacket::Handle(_, h) => h.handle.0 .0.to_vec(),
            p => panic!("not a handle: {p:?}"),
        }
    }

    fn open_f(h: &mut SftpHandler<MemServer>, id: u32) -> Vec<u8> {
        let p = SftpPacket::Open(
            ReqId(id),
            proto::Open {
                filename: Filename(b"f"),
                pflags: proto::OpenFlags(proto::OpenFlags::READ),
                attrs: Attrs::default(),
            },
        );
        handle_of(&call(h, &request(&p)))
    }

    fn handler() -> SftpHandler<MemServer> {
        init_test_log();
        SftpHandler::new(MemServer::default(), SftpConfig::default())
    }

    #[test]
    fn request_before_init() {
        let mut h = handler();
        let mut out = vec![];
        // REALPATH
        let e = h.process(&[16, 0, 0, 0, 1, 0, 0, 0, 1, b'.'], &mut out).unwrap_err();
        assert!(matches!(e, SftpError::NotInitialized));
        assert!(e.is_fatal());
        assert!(out.is_empty());
    }

    #[test]
    fn init_twice() {
        let mut h = handler();
        init(&mut h);
        let mut out = vec![];
        let e = h.process(&[1, 0, 0, 0, 3], &mut out).unwrap_err();
        assert!(matches!(e, SftpError::AlreadyInitialized));
        assert!(out.is_empty());
    }

    #[test]
    fn bad_message_with_id() {
        let mut h = handler();
        init(&mut h);
        // READ with the body cut short
        let r = call(&mut h, &[5, 0, 0, 0, 42, 0, 0, 0, 8, 1, 2]);
        assert_eq!(status_of(&r), (42, StatusCode::SSH_FX_BAD_MESSAGE));
        // unknown type
        let r = call(&mut h, &[99, 0, 0, 0, 43]);
        assert_eq!(status_of(&r), (43, StatusCode::SSH_FX_BAD_MESSAGE));
        // a response type sent by the client
        let r = call(&mut h, &[101, 0, 0, 0, 44, 0, 0, 0, 0]);
        assert_eq!(status_of(&r), (44, StatusCode::SSH_FX_BAD_MESSAGE));
        assert_eq!(h.state(), SftpHandleState::Ready);

        // no room for an id
        let mut out = vec![];
        let e = h.process(&[5, 0, 0], &mut out).unwrap_err();
        assert!(e.is_fatal());
    }

    #[test]
    fn extended_unsupported() {
        let mut h = handler();
        init(&mut h);
        let mut p = vec![200, 0, 0, 0, 7, 0, 0, 0, 3];
        p.extend_from_slice(b"foo");
        p.extend_from_slice(b"extra payload");
        let r = call(&mut h, &p);
        assert_eq!(status_of(&r), (7, StatusCode::SSH_FX_OP_UNSUPPORTED));
    }

    #[test]
    fn read_eof_and_clamp() {
        let mut h = handler();
        h.file_server().content = vec![7u8; 100_000];
        init(&mut h);
        let fh = open_f(&mut h, 1);
        let read = |offset, len| {
            request(&SftpPacket::Read(
                ReqId(2),
                proto::Read { handle: proto::FileHandle(BinString(&fh)), offset, len },
            ))
        };

        let r = call(&mut h, &read(0, u32::MAX));
        let SftpPacket::Data(id, d) = read_sftp(&r).unwrap() else { panic!() };
        assert_eq!(id, ReqId(2));
        assert_eq!(d.data.0.len(), crate::config::DEFAULT_MAX_READ as usize);

        let r = call(&mut h, &read(100_000, 10));
        assert_eq!(status_of(&r), (2, StatusCode::SSH_FX_EOF));
    }

    #[test]
    fn use_after_close() {
        let mut h = handler();
        init(&mut h);
        let fh = open_f(&mut h, 1);
        let close = request(&SftpPacket::Close(
            ReqId(2),
            proto::Close { handle: proto::FileHandle(BinString(&fh)) },
        ));
        assert_eq!(status_of(&call(&mut h, &close)), (2, StatusCode::SSH_FX_OK));
        assert_eq!(status_of(&call(&mut h, &close)), (2, StatusCode::SSH_FX_FAILURE));
        assert_eq!(h.open_handles(), 0);
        assert_eq!(*h.file_server().released.borrow(), ["f"]);
    }

    #[test]
    fn close_failure_releases_once() {
        let mut h = handler();
        h.file_server().fail_close = true;
        init(&mut h);
        let fh = open_f(&mut h, 1);
        let close = request(&SftpPacket::Close(
            ReqId(2),
            proto::Close { handle: proto::FileHandle(BinString(&fh)) },
        ));
        assert_eq!(status_of(&call(&mut h, &close)), (2, StatusCode::SSH_FX_FAILURE));
        assert_eq!(h.open_handles(), 0);
        assert_eq!(status_of(&call(&mut h, &close)), (2, StatusCode::SSH_FX_FAILURE));
        assert_eq!(h.file_server().released.borrow().len(), 1);
    }

    #[test]
    fn wrong_handle_kind() {
        let mut h = handler();
        init(&mut h);
        let opendir = request(&SftpPacket::Opendir(
            ReqId(1),
            proto::Opendir { path: Filename(b"d") },
        ));
        let dh = handle_of(&call(&mut h, &opendir));
        let read = request(&SftpPacket::Read(
            ReqId(2),
            proto::Read { handle: proto::FileHandle(BinString(&dh)), offset: 0, len: 10 },
        ));
        assert_eq!(status_of(&call(&mut h, &read)), (2, StatusCode::SSH_FX_FAILURE));

        let fh = open_f(&mut h, 3);
        let readdir = request(&SftpPacket::Readdir(
            ReqId(4),
            proto::Readdir { handle: proto::FileHandle(BinString(&fh)) },
        ));
        assert_eq!(status_of(&call(&mut h, &readdir)), (4, StatusCode::SSH_FX_FAILURE));
    }

    #[test]
    fn readdir_pages() {
        let mut h = handler();
        h.file_server().entries = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        init(&mut h);
        let opendir = request(&SftpPacket::Opendir(
            ReqId(1),
            proto::Opendir { path: Filename(b"d") },
        ));
        let dh = handle_of(&call(&mut h, &opendir));
        let readdir = request(&SftpPacket::Readdir(
            ReqId(2),
            proto::Readdir { handle: proto::FileHandle(BinString(&dh)) },
        ));

        let names = |r: &[u8]| -> Vec<Vec<u8>> {
            let SftpPacket::Name(_, n) = read_sftp(r).unwrap() else { panic!() };
            n.0.iter().map(|e| e.filename.as_bytes().to_vec()).collect()
        };
        let r = call(&mut h, &readdir);
        assert_eq!(names(&r), [&b"."[..], b"..", b"a", b"b"]);
        let r = call(&mut h, &readdir);
        assert_eq!(names(&r), [b"c"]);
        for _ in 0..3 {
            let r = call(&mut h, &readdir);
            assert_eq!(status_of(&r), (2, StatusCode::SSH_FX_EOF));
        }
    }

    #[test]
    fn loop_releases_at_end() {
        let mut h = handler();
        let released = h.file_server().released.clone();
        let mut input = vec![];
        for p in [
            vec![1u8, 0, 0, 0, 3],
            request(&SftpPacket::Open(
                ReqId(1),
                proto::Open {
                    filename: Filename(b"f"),
                    pflags: proto::OpenFlags(proto::OpenFlags::READ),
                    attrs: Attrs::default(),
                },
            )),
            request(&SftpPacket::Opendir(ReqId(2), proto::Opendir { path: Filename(b"d") })),
        ] {
            input.extend_from_slice(&(p.len() as u32).to_be_bytes());
            input.extend_from_slice(&p);
        }
        let mut out = vec![];
        h.process_loop(&mut input.as_slice(), &mut out).unwrap();
        assert_eq!(h.state(), SftpHandleState::Closed);
        assert_eq!(h.open_handles(), 0);
        assert_eq!(*released.borrow(), ["f", "dir"]);
    }

    #[test]
    fn hook_failure_absorbed() {
        struct Angry;
        impl SftpHook for Angry {
            fn realpath(&mut self, _: &[u8]) -> crate::hooks::HookResult<()> {
                crate::hooks::FailSnafu.fail()
            }
            fn stat(&mut self, _: &[u8]) -> crate::hooks::HookResult<()> {
                panic!("hook panic")
            }
        }

        let mut quiet = handler();
        let mut angry = handler().with_hook(Angry);
        init(&mut quiet);
        init(&mut angry);
        let reqs = [
            request(&SftpPacket::Realpath(ReqId(5), proto::Realpath { path: Filename(b"x") })),
            request(&SftpPacket::Stat(ReqId(6), proto::Stat { path: Filename(b"x") })),
        ];
        for r in reqs.iter() {
            assert_eq!(call(&mut quiet, r), call(&mut angry, r));
        }
        assert_eq!(angry.state(), SftpHandleState::Ready);
    }

    #[test]
    fn readdir_retry_after_failure() {
        let mut h = handler();
        h.file_server().entries = vec![b"a".to_vec()];
        h.file_server().fail_readdir = 1;
        init(&mut h);
        let opendir = request(&SftpPacket::Opendir(
            ReqId(1),
            proto::Opendir { path: Filename(b"d") },
        ));
        let dh = handle_of(&call(&mut h, &opendir));
        let readdir = request(&SftpPacket::Readdir(
            ReqId(2),
            proto::Readdir { handle: proto::FileHandle(BinString(&dh)) },
        ));

        let r = call(&mut h, &readdir);
        assert_eq!(status_of(&r), (2, StatusCode::SSH_FX_FAILURE));

        // the dot entries weren't lost with the failed batch
        let r = call(&mut h, &readdir);
        let SftpPacket::Name(_, n) = read_sftp(&r).unwrap() else { panic!() };
        let names: Vec<&[u8]> = n.0.iter().map(|e| e.filename.as_bytes()).collect();
        assert_eq!(names, [&b"."[..], b"..", b"a"]);
    }
}
