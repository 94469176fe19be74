//! Packet framing over a byte stream.
//!
//! Every packet is a `uint32` big endian length followed by that many
//! payload bytes.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::io::{self, Read, Write};

use pretty_hex::PrettyHex;
use snafu::prelude::*;

use crate::sftperror::{self as error, SftpError, SftpResult};
use crate::sftpwire::{length_enc, SftpEncode};

/// Reads one packet payload.
///
/// Returns `Ok(None)` when the stream ends cleanly before a length prefix.
/// A stream ending anywhere else is [`SftpError::Truncated`].
/// Lengths of zero or above `max_len` are rejected before the payload
/// is read.
pub fn read_packet<R: Read>(
    r: &mut R,
    max_len: usize,
) -> SftpResult<Option<Vec<u8>>> {
    let mut lenbuf = [0u8; 4];
    let mut got = 0;
    while got < lenbuf.len() {
        match r.read(&mut lenbuf[got..]) {
            Ok(0) if got == 0 => return Ok(None),
            Ok(0) => return error::Truncated.fail(),
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SftpError::Input { source: e }),
        }
    }

    let len = u32::from_be_bytes(lenbuf) as usize;
    if len == 0 {
        return error::BadPacket.fail();
    }
    if len > max_len {
        return error::BigPacket { size: len }.fail();
    }

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SftpError::Truncated
        } else {
            SftpError::Input { source: e }
        }
    })?;
    trace!("recv {:?}", payload.hex_dump());
    Ok(Some(payload))
}

/// Writes a length prefixed packet and flushes the output
pub fn write_packet<W, P>(w: &mut W, p: &P) -> SftpResult<()>
where
    W: Write,
    P: SftpEncode,
{
    let len = length_enc(p)?;
    let mut buf = Vec::with_capacity(len as usize + 4);
    len.enc(&mut buf)?;
    p.enc(&mut buf)?;
    trace!("send {:?}", buf.hex_dump());

    w.write_all(&buf).context(error::Output)?;
    w.flush().context(error::Output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{InitVersionLowest, SftpPacket};
    use crate::sftplog::init_test_log;
    use std::io::Cursor;

    #[test]
    fn frame_roundtrip() {
        init_test_log();
        let mut out = vec![];
        write_packet(&mut out, &SftpPacket::from(InitVersionLowest { version: 3 }))
            .unwrap();
        assert_eq!(out, [0, 0, 0, 5, 2, 0, 0, 0, 3]);

        let mut r = Cursor::new(out);
        let p = read_packet(&mut r, 100).unwrap().unwrap();
        assert_eq!(p, [2, 0, 0, 0, 3]);
        assert!(read_packet(&mut r, 100).unwrap().is_none());
    }

    #[test]
    fn clean_eof() {
        let mut r = Cursor::new(vec![]);
        assert!(read_packet(&mut r, 100).unwrap().is_none());
    }

    #[test]
    fn truncated_length() {
        let mut r = Cursor::new(vec![0u8, 0]);
        let e = read_packet(&mut r, 100).unwrap_err();
        assert!(matches!(e, SftpError::Truncated));
    }

    #[test]
    fn truncated_payload() {
        let mut r = Cursor::new(vec![0u8, 0, 0, 9, 1, 2, 3]);
        let e = read_packet(&mut r, 100).unwrap_err();
        assert!(matches!(e, SftpError::Truncated));
        assert!(e.is_fatal());
    }

    #[test]
    fn length_limits() {
        let mut r = Cursor::new(vec![0u8, 0, 0, 0]);
        let e = read_packet(&mut r, 100).unwrap_err();
        assert!(matches!(e, SftpError::BadPacket));

        let mut r = Cursor::new(vec![0xffu8, 0xff, 0xff, 0xff]);
        let e = read_packet(&mut r, 100).unwrap_err();
        assert!(matches!(e, SftpError::BigPacket { size: 0xffffffff }));
    }
}
