//! SFTP wire format reading/writing.
//! Used in conjunction with [`sunset_sftpwire_derive`] and the
//! [`proto`](crate::proto) packet definitions.
//!
//! All integers are big endian. Strings are a `u32` length followed by
//! that many raw bytes, with no terminator and no implied encoding.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use core::fmt::{self, Debug};

use pretty_hex::PrettyHex;
use snafu::prelude::*;

/// A generic destination for serializing, used similarly to `serde::Serializer`
pub trait SftpSink {
    fn push(&mut self, v: &[u8]) -> WireResult<()>;
}

/// A generic source for a packet, used similarly to `serde::Deserializer`
pub trait SftpSource<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]>;
    fn pos(&self) -> usize;
    fn remaining(&self) -> usize;
}

/// Encodes the type in SFTP wire format
pub trait SftpEncode {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink;
}

/// Decodes the type from SFTP wire format, borrowing from the input
pub trait SftpDecode<'de>: Sized {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>;
}

/// Errors from `SftpEncode` and `SftpDecode`.
///
/// Any of these while decoding a request body is answered with
/// `SSH_FX_BAD_MESSAGE`.
#[derive(Snafu, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Output buffer ran out of room
    NoRoom,

    /// Input ran out before the field was complete
    RanOut,

    /// Not a valid string
    BadString,

    /// Packet is not allowed here
    PacketWrong,

    #[snafu(display("Unknown packet type {number}"))]
    UnknownPacket { number: u8 },
}

pub type WireResult<T> = core::result::Result<T, WireError>;

///////////////////////////////////////////////

/// Decodes a `T` from the start of `b`. Trailing bytes are left unread.
pub fn read_sftp<'a, T: SftpDecode<'a>>(b: &'a [u8]) -> WireResult<T> {
    let mut s = DecodeBytes::new(b);
    T::dec(&mut s)
}

/// Encodes `value` into `target`, returning the length written.
pub fn write_sftp<T>(target: &mut [u8], value: &T) -> WireResult<usize>
where
    T: SftpEncode,
{
    let mut s = EncodeBytes { target, pos: 0 };
    value.enc(&mut s)?;
    Ok(s.pos)
}

/// Appends the encoded `value` to a `Vec`
pub fn sftp_push_vec<T>(v: &mut Vec<u8>, value: &T) -> WireResult<()>
where
    T: SftpEncode,
{
    value.enc(v)
}

/// Returns `WireError::NoRoom` if larger than `u32`
pub fn length_enc<T>(value: &T) -> WireResult<u32>
where
    T: SftpEncode,
{
    let mut s = EncodeLen { pos: 0 };
    value.enc(&mut s)?;
    s.pos.try_into().map_err(|_| WireError::NoRoom)
}

struct EncodeBytes<'a> {
    target: &'a mut [u8],
    pos: usize,
}

impl SftpSink for EncodeBytes<'_> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        if self.pos + v.len() > self.target.len() {
            return Err(WireError::NoRoom);
        }
        self.target[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
        Ok(())
    }
}

struct EncodeLen {
    pos: usize,
}

impl SftpSink for EncodeLen {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.pos += v.len();
        Ok(())
    }
}

impl SftpSink for Vec<u8> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.extend_from_slice(v);
        Ok(())
    }
}

/// A [`SftpSource`] over a borrowed buffer, typically one packet payload.
///
/// Besides plain decoding it can peek the packet type and request id
/// without consuming, so that a request id can still be recovered when the
/// rest of a request fails to decode.
#[derive(Debug)]
pub struct DecodeBytes<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> DecodeBytes<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        DecodeBytes { input, pos: 0 }
    }

    /// Peeks the packet type byte at the start of the payload
    pub fn peek_packet_type(&self) -> WireResult<u8> {
        self.input.first().copied().ok_or(WireError::RanOut)
    }

    /// Peeks the request id that follows the packet type byte
    pub fn peek_req_id(&self) -> WireResult<u32> {
        let b = self.input.get(1..5).ok_or(WireError::RanOut)?;
        read_sftp(b)
    }

    /// The part of the buffer consumed so far
    pub fn buffer_used(&self) -> &'a [u8] {
        &self.input[..self.pos]
    }
}

impl<'de> SftpSource<'de> for DecodeBytes<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]> {
        if len > self.remaining() {
            return Err(WireError::RanOut);
        }
        let t = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(t)
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }
}

///////////////////////////////////////////////

/// A SFTP style binary string. Serialized as `u32` length followed by the bytes
/// of the slice.
///
/// Filenames, link targets, handles and file data are all carried as
/// `BinString`. No text encoding is assumed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BinString<'a>(pub &'a [u8]);

impl<'a> AsRef<[u8]> for BinString<'a> {
    fn as_ref(&self) -> &'a [u8] {
        self.0
    }
}

impl<'a> Debug for BinString<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinString(len={})", self.0.len())
    }
}

impl SftpEncode for BinString<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        let len: u32 = self.0.len().try_into().map_err(|_| WireError::NoRoom)?;
        len.enc(s)?;
        s.push(self.0)
    }
}

impl<'de: 'a, 'a> SftpDecode<'de> for BinString<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        let len = u32::dec(s)? as usize;
        Ok(BinString(s.take(len)?))
    }
}

/// A path or filename as sent by the peer.
///
/// Treated as opaque bytes, it is usually UTF-8 but that is not
/// guaranteed by version 3 of the protocol.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Filename<'a>(pub &'a [u8]);

impl<'a> Filename<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }
}

impl<'a> From<&'a [u8]> for Filename<'a> {
    fn from(b: &'a [u8]) -> Self {
        Filename(b)
    }
}

impl<'a> From<&'a str> for Filename<'a> {
    fn from(s: &'a str) -> Self {
        Filename(s.as_bytes())
    }
}

impl<'a> Debug for Filename<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = core::str::from_utf8(self.0) {
            write!(f, "Filename(\"{}\")", s.escape_default())
        } else {
            write!(f, "Filename(not utf8!, {:?})", self.0.hex_dump())
        }
    }
}

impl SftpEncode for Filename<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        BinString(self.0).enc(s)
    }
}

impl<'de: 'a, 'a> SftpDecode<'de> for Filename<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        Ok(Filename(BinString::dec(s)?.0))
    }
}

///////////////////////////////////////////////

impl SftpEncode for u8 {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        s.push(&[*self])
    }
}

impl SftpEncode for u32 {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        s.push(&self.to_be_bytes())
    }
}

impl SftpEncode for u64 {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        s.push(&self.to_be_bytes())
    }
}

// length prefixed, no terminator
impl SftpEncode for &str {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        BinString(self.as_bytes()).enc(s)
    }
}

impl<'de: 'a, 'a> SftpDecode<'de> for &'a str {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        let b = BinString::dec(s)?.0;
        core::str::from_utf8(b).map_err(|_| WireError::BadString)
    }
}

impl<T: SftpEncode> SftpEncode for Option<T> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        if let Some(t) = self.as_ref() {
            t.enc(s)?;
        }
        Ok(())
    }
}

// #[inline] seems to decrease code size somehow

impl<'de> SftpDecode<'de> for u8 {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        let t = s.take(1)?;
        Ok(t[0])
    }
}

impl<'de> SftpDecode<'de> for u32 {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        let t = s.take(core::mem::size_of::<u32>())?;
        let mut b = [0u8; 4];
        b.copy_from_slice(t);
        Ok(u32::from_be_bytes(b))
    }
}

impl<'de> SftpDecode<'de> for u64 {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        let t = s.take(core::mem::size_of::<u64>())?;
        let mut b = [0u8; 8];
        b.copy_from_slice(t);
        Ok(u64::from_be_bytes(b))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sftplog::init_test_log;

    /// Checks that two items serialize the same
    pub fn assert_serialize_equal<T: SftpEncode>(p1: &T, p2: &T) {
        let mut buf1 = vec![];
        let mut buf2 = vec![];
        sftp_push_vec(&mut buf1, p1).unwrap();
        sftp_push_vec(&mut buf2, p2).unwrap();
        assert_eq!(buf1, buf2);
    }

    #[test]
    fn integers_are_big_endian() {
        init_test_log();
        let mut v = vec![];
        sftp_push_vec(&mut v, &0x01020304u32).unwrap();
        sftp_push_vec(&mut v, &0x1122334455667788u64).unwrap();
        assert_eq!(
            v,
            [1, 2, 3, 4, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
        );

        let mut s = DecodeBytes::new(&v);
        assert_eq!(u32::dec(&mut s).unwrap(), 0x01020304);
        assert_eq!(u64::dec(&mut s).unwrap(), 0x1122334455667788);
        assert_eq!(s.remaining(), 0);
    }

    #[test]
    fn binstring_is_length_prefixed_raw_bytes() {
        // not valid utf8, must pass through untouched
        let raw = [0xffu8, 0x00, 0x80, b'a'];
        let mut v = vec![];
        sftp_push_vec(&mut v, &BinString(&raw)).unwrap();
        assert_eq!(v, [0, 0, 0, 4, 0xff, 0x00, 0x80, b'a']);

        let b: BinString = read_sftp(&v).unwrap();
        assert_eq!(b.0, &raw);
    }

    #[test]
    fn string_length_past_end() {
        let v = [0u8, 0, 0, 10, b'a', b'b'];
        let r: WireResult<BinString> = read_sftp(&v);
        assert_eq!(r.unwrap_err(), WireError::RanOut);
    }

    #[test]
    fn write_sftp_no_room() {
        let mut buf = [0u8; 6];
        let e = write_sftp(&mut buf, &"too long").unwrap_err();
        assert_eq!(e, WireError::NoRoom);
        let l = write_sftp(&mut buf, &"ab").unwrap();
        assert_eq!(l, 6);
        assert_eq!(length_enc(&"ab").unwrap(), 6);
    }

    #[test]
    fn peeking() {
        let v = [5u8, 0, 0, 0, 42, 1];
        let s = DecodeBytes::new(&v);
        assert_eq!(s.peek_packet_type().unwrap(), 5);
        assert_eq!(s.peek_req_id().unwrap(), 42);
        assert_eq!(s.pos(), 0);

        let short = DecodeBytes::new(&v[..3]);
        assert_eq!(short.peek_packet_type().unwrap(), 5);
        assert_eq!(short.peek_req_id().unwrap_err(), WireError::RanOut);

        let empty = DecodeBytes::new(&[]);
        assert!(empty.peek_packet_type().is_err());
    }
}
