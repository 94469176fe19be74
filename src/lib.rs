//! An SFTP version 3 server, speaking the protocol over a byte stream
//! such as a subsystem's stdin and stdout.
//!
//! [`SftpHandler`] runs a session against a [`SftpServer`] storage
//! backend. [`LocalServer`] serves a local directory tree.

#![forbid(unsafe_code)]
// avoids headscratching
#![deny(unused_must_use)]

pub mod sftpwire;
pub mod proto;
pub mod attrs;
pub mod config;
// exported so that some error variants can be created with .fail()
pub mod sftperror;
pub mod hooks;

mod packet;
mod handles;
mod status;
mod sftplog;
mod sftpserver;
mod sftphandler;
mod localserver;
mod urlhook;

pub use attrs::{Attrs, ExtPair, FileType};
pub use config::{SftpConfig, SFTP_VERSION};
pub use handles::HandleId;
pub use hooks::{HookError, HookResult, LogHook, NoHook, SftpHook};
pub use localserver::{attrs_from_metadata, LocalDir, LocalFile, LocalServer};
pub use packet::{read_packet, write_packet};
pub use proto::{OpenFlags, ReqId, SftpNum, SftpPacket, StatusCode};
pub use sftperror::{SftpError, SftpResult};
pub use sftphandler::{SftpHandleState, SftpHandler};
pub use sftpserver::{DirEntry, SftpServer};
pub use urlhook::UrlRequestHook;
