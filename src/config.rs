/// The protocol version spoken, draft-ietf-secsh-filexfer-02
pub const SFTP_VERSION: u32 = 3;

// OpenSSH sftp-server accepts 256kB packets, clients send 32kB-ish
// read/write requests so this leaves plenty of room.
pub const DEFAULT_MAX_PACKET: usize = 256 * 1024;

// Reply overhead is 13 bytes (length, type, id, data length)
pub const DEFAULT_MAX_READ: u32 = 64 * 1024;

// Entries per SSH_FXP_NAME reply to SSH_FXP_READDIR
pub const DEFAULT_READDIR_BATCH: usize = 100;

/// Limits for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpConfig {
    /// Largest accepted incoming packet payload. A larger length prefix
    /// ends the session.
    pub max_packet_len: usize,

    /// `SSH_FXP_READ` lengths are clamped to this
    pub max_read_len: u32,

    /// Maximum number of entries returned by one `SSH_FXP_READDIR`
    pub readdir_batch: usize,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            max_packet_len: DEFAULT_MAX_PACKET,
            max_read_len: DEFAULT_MAX_READ,
            readdir_batch: DEFAULT_READDIR_BATCH,
        }
    }
}
