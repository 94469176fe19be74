//! SFTP v3 packet definitions, draft-ietf-secsh-filexfer-02
//!
//! Packet payloads are `byte type`, then `uint32 request-id` for everything
//! except `SSH_FXP_INIT`/`SSH_FXP_VERSION`, then the type specific body.
//! The outer `uint32 length` is handled by [`packet`](crate::packet).

use crate::attrs::Attrs;
use crate::sftpwire::{
    BinString, Filename, SftpDecode, SftpEncode, SftpSink, SftpSource, WireError,
    WireResult,
};
use sunset_sftpwire_derive::{SftpDecode, SftpEncode};

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};
use num_enum::FromPrimitive;
use paste::paste;

/// An opaque handle issued by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, SftpEncode, SftpDecode)]
pub struct FileHandle<'a>(pub BinString<'a>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, SftpEncode, SftpDecode)]
pub struct ReqId(pub u32);

/// The SFTP version of the client
#[derive(Debug, SftpEncode, SftpDecode)]
pub struct InitVersionClient {
    // No ReqId for SSH_FXP_INIT.
    // Any extension pairs following are ignored
    pub version: u32,
}

/// The version the server speaks
#[derive(Debug, SftpEncode, SftpDecode)]
pub struct InitVersionLowest {
    // No ReqId for SSH_FXP_VERSION
    pub version: u32,
}

/// `pflags` of `SSH_FXP_OPEN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, SftpEncode, SftpDecode)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READ: u32 = 0x01;
    pub const WRITE: u32 = 0x02;
    pub const APPEND: u32 = 0x04;
    pub const CREAT: u32 = 0x08;
    pub const TRUNC: u32 = 0x10;
    pub const EXCL: u32 = 0x20;

    pub fn read(&self) -> bool {
        self.0 & Self::READ != 0
    }
    pub fn write(&self) -> bool {
        self.0 & Self::WRITE != 0
    }
    pub fn append(&self) -> bool {
        self.0 & Self::APPEND != 0
    }
    pub fn creat(&self) -> bool {
        self.0 & Self::CREAT != 0
    }
    pub fn trunc(&self) -> bool {
        self.0 & Self::TRUNC != 0
    }
    pub fn excl(&self) -> bool {
        self.0 & Self::EXCL != 0
    }
}

// Requests

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Open<'a> {
    pub filename: Filename<'a>,
    pub pflags: OpenFlags,
    pub attrs: Attrs,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Close<'a> {
    pub handle: FileHandle<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Read<'a> {
    pub handle: FileHandle<'a>,
    pub offset: u64,
    pub len: u32,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Write<'a> {
    pub handle: FileHandle<'a>,
    pub offset: u64,
    pub data: BinString<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Lstat<'a> {
    pub path: Filename<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Fstat<'a> {
    pub handle: FileHandle<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Setstat<'a> {
    pub path: Filename<'a>,
    pub attrs: Attrs,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Fsetstat<'a> {
    pub handle: FileHandle<'a>,
    pub attrs: Attrs,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Opendir<'a> {
    pub path: Filename<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Readdir<'a> {
    pub handle: FileHandle<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Remove<'a> {
    pub filename: Filename<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Mkdir<'a> {
    pub path: Filename<'a>,
    pub attrs: Attrs,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Rmdir<'a> {
    pub path: Filename<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Realpath<'a> {
    pub path: Filename<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Stat<'a> {
    pub path: Filename<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Rename<'a> {
    pub oldpath: Filename<'a>,
    pub newpath: Filename<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Readlink<'a> {
    pub path: Filename<'a>,
}

/// Fields in draft-02 order, link path first. OpenSSH's server and
/// client swap them and send the target first.
#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Symlink<'a> {
    pub linkpath: Filename<'a>,
    pub targetpath: Filename<'a>,
}

/// Vendor extension request. Only the name is decoded, the rest of the
/// payload is left unread.
#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Extended<'a> {
    pub request: BinString<'a>,
}

// Responses

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Status<'a> {
    pub code: StatusCode,
    pub message: &'a str,
    pub lang: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, SftpEncode, SftpDecode)]
pub struct Handle<'a> {
    pub handle: FileHandle<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct Data<'a> {
    pub data: BinString<'a>,
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct NameEntry<'a> {
    pub filename: Filename<'a>,
    /// longname is an undefined text line like "ls -l",
    /// SHOULD NOT be used.
    pub longname: BinString<'a>,
    pub attrs: Attrs,
}

#[derive(Debug)]
pub struct Name<'a>(pub Vec<NameEntry<'a>>);

impl<'de: 'a, 'a> SftpDecode<'de> for Name<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        let count = u32::dec(s)? as usize;

        // An entry is at least 12 bytes, don't trust the count for allocation
        let mut names = Vec::with_capacity(count.min(s.remaining() / 12));

        for _ in 0..count {
            names.push(NameEntry::dec(s)?);
        }

        Ok(Name(names))
    }
}

impl SftpEncode for Name<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        (self.0.len() as u32).enc(s)?;

        for element in self.0.iter() {
            element.enc(s)?;
        }
        Ok(())
    }
}

#[derive(Debug, SftpEncode, SftpDecode)]
pub struct ResponseAttributes {
    pub attrs: Attrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum StatusCode {
    SSH_FX_OK = 0,
    SSH_FX_EOF = 1,
    SSH_FX_NO_SUCH_FILE = 2,
    SSH_FX_PERMISSION_DENIED = 3,
    SSH_FX_FAILURE = 4,
    SSH_FX_BAD_MESSAGE = 5,
    SSH_FX_NO_CONNECTION = 6,
    SSH_FX_CONNECTION_LOST = 7,
    SSH_FX_OP_UNSUPPORTED = 8,
    #[num_enum(catch_all)]
    Other(u32),
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        match code {
            StatusCode::SSH_FX_OK => 0,
            StatusCode::SSH_FX_EOF => 1,
            StatusCode::SSH_FX_NO_SUCH_FILE => 2,
            StatusCode::SSH_FX_PERMISSION_DENIED => 3,
            StatusCode::SSH_FX_FAILURE => 4,
            StatusCode::SSH_FX_BAD_MESSAGE => 5,
            StatusCode::SSH_FX_NO_CONNECTION => 6,
            StatusCode::SSH_FX_CONNECTION_LOST => 7,
            StatusCode::SSH_FX_OP_UNSUPPORTED => 8,
            StatusCode::Other(n) => n,
        }
    }
}

impl SftpEncode for StatusCode {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SftpSink,
    {
        u32::from(*self).enc(s)
    }
}

impl<'de> SftpDecode<'de> for StatusCode {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SftpSource<'de>,
    {
        Ok(StatusCode::from(u32::dec(s)?))
    }
}

macro_rules! sftpmessages {
    (
        init: {
            $( ( $init_message_num:tt,
                $init_packet_variant:ident,
                $init_packet_type:ty,
                $init_ssh_fxp_name:ident
                ),
                 )*
        },
        request: {
            $( ( $request_message_num:tt,
                $request_packet_variant:ident,
                $request_packet_type:ty,
                $request_ssh_fxp_name:ident
                ),
                 )*
        },
        response: {
            $( ( $response_message_num:tt,
                $response_packet_variant:ident,
                $response_packet_type:ty,
                $response_ssh_fxp_name:ident
                ),
                 )*
                },
    ) => {
        paste! {
            /// SFTP packet types defined by draft-ietf-secsh-filexfer-02
            #[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
            #[repr(u8)]
            #[allow(non_camel_case_types)]
            pub enum SftpNum {
                $(
                    [<$init_ssh_fxp_name:upper>] = $init_message_num,
                )*

                $(
                    [<$request_ssh_fxp_name:upper>] = $request_message_num,
                )*

                $(
                    [<$response_ssh_fxp_name:upper>] = $response_message_num,
                )*

                #[num_enum(catch_all)]
                Other(u8),
            }
        } // paste

        impl<'de> SftpDecode<'de> for SftpNum {
            fn dec<S>(s: &mut S) -> WireResult<Self>
            where
                S: SftpSource<'de>,
            {
                Ok(SftpNum::from(u8::dec(s)?))
            }
        }

        impl SftpEncode for SftpNum {
            fn enc<S>(&self, s: &mut S) -> WireResult<()>
            where
                S: SftpSink,
            {
                u8::from(*self).enc(s)
            }
        }

        paste!{
        impl From<SftpNum> for u8 {
            fn from(sftp_num: SftpNum) -> u8 {
                match sftp_num {
                    $(
                        SftpNum::[<$init_ssh_fxp_name:upper>] => $init_message_num,
                    )*
                    $(
                        SftpNum::[<$request_ssh_fxp_name:upper>] => $request_message_num,
                    )*
                    $(
                        SftpNum::[<$response_ssh_fxp_name:upper>] => $response_message_num,
                    )*

                    SftpNum::Other(number) => number // Other, not in the enum definition
                }
            }
        }
        } //paste

        paste!{
        impl SftpNum {
            pub fn is_init(&self) -> bool {
                matches!(self, SftpNum::SSH_FXP_INIT)
            }

            pub fn is_request(&self) -> bool {
                matches!(self, $( SftpNum::[<$request_ssh_fxp_name:upper>] )|* )
            }

            pub fn is_response(&self) -> bool {
                matches!(self, SftpNum::SSH_FXP_VERSION $( | SftpNum::[<$response_ssh_fxp_name:upper>] )* )
            }
        }
        } //paste

        /// Top level SFTP packet enum
        ///
        /// It helps identifying the SFTP Packet type and handling it accordingly
        /// This is done using the SFTP field type
        #[derive(Debug)]
        pub enum SftpPacket<'a> {
                $(
                    $init_packet_variant($init_packet_type),
                )*
                $(
                    $request_packet_variant(ReqId, $request_packet_type),
                )*
                $(
                    $response_packet_variant(ReqId, $response_packet_type),
                )*
        }

        /// Encodes the type byte, request id and body. The length prefix
        /// isn't included.
        impl SftpEncode for SftpPacket<'_> {
            fn enc<S>(&self, s: &mut S) -> WireResult<()>
            where
                S: SftpSink,
            {
                self.sftp_num().enc(s)?;
                match self {
                    $(
                    SftpPacket::$init_packet_variant(p) => {
                        p.enc(s)?
                    }
                    )*
                    $(
                    SftpPacket::$request_packet_variant(id, p) => {
                        id.enc(s)?;
                        p.enc(s)?
                    }
                    )*
                    $(
                    SftpPacket::$response_packet_variant(id, p) => {
                        id.enc(s)?;
                        p.enc(s)?
                    }
                    )*
                };
                Ok(())
            }
        }

        paste!{
        impl<'de: 'a, 'a> SftpDecode<'de> for SftpPacket<'a> {
            fn dec<S>(s: &mut S) -> WireResult<Self>
            where S: SftpSource<'de> {
                let packet_type_number = u8::dec(s)?;

                let packet_type = SftpNum::from(packet_type_number);

                let decoded_packet = match packet_type {
                    $(
                        SftpNum::[<$init_ssh_fxp_name:upper>] => {
                            let inner_type = <$init_packet_type>::dec(s)?;
                            SftpPacket::$init_packet_variant(inner_type)
                        },
                    )*
                    $(
                        SftpNum::[<$request_ssh_fxp_name:upper>] => {
                            let req_id = <ReqId>::dec(s)?;
                            let inner_type = <$request_packet_type>::dec(s)?;
                            SftpPacket::$request_packet_variant(req_id, inner_type)
                        },
                    )*
                    $(
                        SftpNum::[<$response_ssh_fxp_name:upper>] => {
                            let req_id = <ReqId>::dec(s)?;
                            let inner_type = <$response_packet_type>::dec(s)?;
                            SftpPacket::$response_packet_variant(req_id, inner_type)
                        },
                    )*
                    SftpNum::Other(_) => return Err(WireError::UnknownPacket { number: packet_type_number })
                };
                Ok(decoded_packet)
            }
        }
        } // paste

        impl<'a> SftpPacket<'a> {
            /// Maps `SpecificPacketVariant` to `message_num`
            pub fn sftp_num(&self) -> SftpNum {
                match self {
                    $(
                    SftpPacket::$init_packet_variant(_) => {
                        SftpNum::from($init_message_num as u8)
                    }
                    )*
                    $(
                    SftpPacket::$request_packet_variant(_,_) => {
                        SftpNum::from($request_message_num as u8)
                    }
                    )*
                    $(
                    SftpPacket::$response_packet_variant(_,_) => {
                        SftpNum::from($response_message_num as u8)
                    }
                    )*
                }
            }

            /// The request id, `None` for init and version packets
            pub fn req_id(&self) -> Option<ReqId> {
                match self {
                    $(
                    SftpPacket::$init_packet_variant(_) => None,
                    )*
                    $(
                    SftpPacket::$request_packet_variant(id, _) => Some(*id),
                    )*
                    $(
                    SftpPacket::$response_packet_variant(id, _) => Some(*id),
                    )*
                }
            }

            /// Decode a request. Includes Initialization packets
            ///
            /// Used by a SFTP server. Does not include the length field.
            ///
            /// It will fail if the received packet is a response
            pub fn decode_request<S>(s: &mut S) -> WireResult<Self>
            where
                S: SftpSource<'a>,
            {
                let sftp_packet = Self::dec(s)?;

                if !sftp_packet.sftp_num().is_request()
                    && !sftp_packet.sftp_num().is_init()
                {
                    return Err(WireError::PacketWrong)
                }

                Ok(sftp_packet)
            }

            /// Decode a response.
            ///
            /// Used by a SFTP client. Does not include the length field.
            pub fn decode_response<S>(s: &mut S) -> WireResult<Self>
            where
                S: SftpSource<'a>,
            {
                let sftp_packet = Self::dec(s)?;

                if !sftp_packet.sftp_num().is_response() {
                    return Err(WireError::PacketWrong)
                }

                Ok(sftp_packet)
            }
        }

        $(
        impl<'a> From<$init_packet_type> for SftpPacket<'a> {
            fn from(s: $init_packet_type) -> SftpPacket<'a> {
                SftpPacket::$init_packet_variant(s)
            }
        }
        )*
    }; // main macro

} // sftpmessages macro

sftpmessages! [

        init: {
            (1, Init, InitVersionClient, ssh_fxp_init),
            (2, Version, InitVersionLowest, ssh_fxp_version),
        },

        request: {
            (3, Open, Open<'a>, ssh_fxp_open),
            (4, Close, Close<'a>, ssh_fxp_close),
            (5, Read, Read<'a>, ssh_fxp_read),
            (6, Write, Write<'a>, ssh_fxp_write),
            (7, Lstat, Lstat<'a>, ssh_fxp_lstat),
            (8, Fstat, Fstat<'a>, ssh_fxp_fstat),
            (9, Setstat, Setstat<'a>, ssh_fxp_setstat),
            (10, Fsetstat, Fsetstat<'a>, ssh_fxp_fsetstat),
            (11, Opendir, Opendir<'a>, ssh_fxp_opendir),
            (12, Readdir, Readdir<'a>, ssh_fxp_readdir),
            (13, Remove, Remove<'a>, ssh_fxp_remove),
            (14, Mkdir, Mkdir<'a>, ssh_fxp_mkdir),
            (15, Rmdir, Rmdir<'a>, ssh_fxp_rmdir),
            (16, Realpath, Realpath<'a>, ssh_fxp_realpath),
            (17, Stat, Stat<'a>, ssh_fxp_stat),
            (18, Rename, Rename<'a>, ssh_fxp_rename),
            (19, Readlink, Readlink<'a>, ssh_fxp_readlink),
            (20, Symlink, Symlink<'a>, ssh_fxp_symlink),
            (200, Extended, Extended<'a>, ssh_fxp_extended),
        },

        response: {
            (101, Status, Status<'a>, ssh_fxp_status),
            (102, Handle, Handle<'a>, ssh_fxp_handle),
            (103, Data, Data<'a>, ssh_fxp_data),
            (104, Name, Name<'a>, ssh_fxp_name),
            (105, Attrs, ResponseAttributes, ssh_fxp_attrs),
        },
];
