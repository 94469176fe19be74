//! File attributes, the bitmask-gated `ATTRS` structure of SFTP v3.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use time::OffsetDateTime;

use crate::sftpwire::{
    BinString, SftpDecode, SftpEncode, SftpSink, SftpSource, WireResult,
};

/// An opaque extended attribute pair. Carried through, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtPair {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
}

/// Files attributes to describe Files as SFTP v3 specification
///
/// The flags word isn't stored, it is derived from which fields are
/// present. `uid`/`gid` and `atime`/`mtime` travel as pairs, a pair is
/// only encoded when both halves are set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Attrs {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// POSIX `st_mode`, including the file type bits
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub extended: Vec<ExtPair>,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy)]
pub enum AttrsFlags {
    SSH_FILEXFER_ATTR_SIZE = 0x01,
    SSH_FILEXFER_ATTR_UIDGID = 0x02,
    SSH_FILEXFER_ATTR_PERMISSIONS = 0x04,
    SSH_FILEXFER_ATTR_ACMODTIME = 0x08,
    SSH_FILEXFER_ATTR_EXTENDED = 0x80000000,
}

impl core::ops::AddAssign<AttrsFlags> for u32 {
    fn add_assign(&mut self, other: AttrsFlags) {
        *self |= other as u32;
    }
}

impl core::ops::BitAnd<AttrsFlags> for u32 {
    type Output = u32;

    fn bitand(self, rhs: AttrsFlags) -> Self::Output {
        self & rhs as u32
    }
}

/// File type from the `S_IFMT` bits of a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

const S_IFMT: u32 = 0o170000;

impl FileType {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            0o100000 => FileType::Regular,
            0o040000 => FileType::Directory,
            0o120000 => FileType::Symlink,
            0o020000 => FileType::CharDevice,
            0o060000 => FileType::BlockDevice,
            0o010000 => FileType::Fifo,
            0o140000 => FileType::Socket,
            _ => FileType::Unknown,
        }
    }

    fn ls_char(&self) -> char {
        match self {
            FileType::Regular => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::CharDevice => 'c',
            FileType::BlockDevice => 'b',
            FileType::Fifo => 'p',
            FileType::Socket => 's',
            FileType::Unknown => '?',
        }
    }
}

impl Attrs {
    pub fn flags(&self) -> u32 {
        let mut flags: u32 = 0;
        if self.size.is_some() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_SIZE
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_UIDGID
        }
        if self.permissions.is_some() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_PERMISSIONS
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME
        }
        if !self.extended.is_empty() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED
        }
        flags
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.permissions.map(FileType::from_mode)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    /// A `ls -l` style line for the `longname` field of `SSH_FXP_NAME`.
    ///
    /// Clients shouldn't parse it, but several display it verbatim.
    /// Times are shown in UTC.
    pub fn long_listing(&self, name: &[u8]) -> Vec<u8> {
        let mode = match self.permissions {
            Some(p) => mode_string(p),
            None => "?---------".into(),
        };
        let uid = self.uid.map(|u| u.to_string()).unwrap_or_else(|| "?".into());
        let gid = self.gid.map(|g| g.to_string()).unwrap_or_else(|| "?".into());
        let size =
            self.size.map(|s| s.to_string()).unwrap_or_else(|| "?".into());
        let date = self.mtime.map(ls_date).unwrap_or_else(|| "?".into());

        // nlink isn't carried in v3 attributes
        let mut l = format!(
            "{mode} {:>3} {uid:<8} {gid:<8} {size:>8} {date} ",
            1
        )
        .into_bytes();
        l.extend_from_slice(name);
        l
    }
}

fn mode_string(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push(FileType::from_mode(mode).ls_char());
    // (read, write, exec, special bit, special char)
    let triples = [
        (0o400, 0o200, 0o100, 0o4000, 's'),
        (0o040, 0o020, 0o010, 0o2000, 's'),
        (0o004, 0o002, 0o001, 0o1000, 't'),
    ];
    for (r, w, x, special, c) in triples {
        s.push(if mode & r != 0 { 'r' } else { '-' });
        s.push(if mode & w != 0 { 'w' } else { '-' });
        let exec = mode & x != 0;
        s.push(match (mode & special != 0, exec) {
            (true, true) => c,
            (true, false) => c.to_ascii_uppercase(),
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    s
}

// Like ls, recent files show the time, older ones the year
fn ls_date(mtime: u32) -> String {
    const SIX_MONTHS: i64 = 182 * 24 * 60 * 60;

    let Ok(t) = OffsetDateTime::from_unix_timestamp(mtime as i64) else {
        return "?".into();
    };
    let month = t.month().to_string();
    let month = month.get(..3).unwrap_or("???");
    let age = OffsetDateTime::now_utc().unix_timestamp() - mtime as i64;
    if (0..SIX_MONTHS).contains(&age) {
        format!("{month} {:>2} {:02}:{:02}", t.day(), t.hour(), t.minute())
    } else {
        format!("{month} {:>2}  {}", t.day(), t.year())
    }
}

impl SftpEncode for ExtPair {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        BinString(&self.name).enc(s)?;
        BinString(&self.data).enc(s)
    }
}

impl<'de> SftpDecode<'de> for ExtPair {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        let name = BinString::dec(s)?.0.to_vec();
        let data = BinString::dec(s)?.0.to_vec();
        Ok(ExtPair { name, data })
    }
}

impl SftpEncode for Attrs {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        let flags = self.flags();
        flags.enc(s)?;

        // IMPORTANT: Order matters in the encoding/decoding since it will be interpreted together with the flags
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_SIZE != 0 {
            self.size.enc(s)?;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_UIDGID != 0 {
            self.uid.enc(s)?;
            self.gid.enc(s)?;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_PERMISSIONS != 0 {
            self.permissions.enc(s)?;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME != 0 {
            self.atime.enc(s)?;
            self.mtime.enc(s)?;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED != 0 {
            (self.extended.len() as u32).enc(s)?;
            for e in self.extended.iter() {
                e.enc(s)?;
            }
        }
        Ok(())
    }
}

impl<'de> SftpDecode<'de> for Attrs {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        let mut attrs = Attrs::default();
        let flags = u32::dec(s)?;
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_SIZE != 0 {
            attrs.size = Some(u64::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_UIDGID != 0 {
            attrs.uid = Some(u32::dec(s)?);
            attrs.gid = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME != 0 {
            attrs.atime = Some(u32::dec(s)?);
            attrs.mtime = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED != 0 {
            let count = u32::dec(s)? as usize;
            // each pair is at least two empty strings
            let mut ext = Vec::with_capacity(count.min(s.remaining() / 8));
            for _ in 0..count {
                ext.push(ExtPair::dec(s)?);
            }
            attrs.extended = ext;
        }
        Ok(attrs)
    }
}
