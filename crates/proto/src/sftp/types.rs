//! SFTP data types: status codes, open flags, and file attributes.

use super::error::{Error, Result};
use super::wire::{WireReader, WireWriter};
use sealink_platform::fs::{FileStat, OpenMode};
use std::io;

/// SFTP status codes (SSH_FX_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    /// SSH_FX_OK - Success
    Ok = 0,
    /// SSH_FX_EOF - End of file
    Eof = 1,
    /// SSH_FX_NO_SUCH_FILE - No such file
    NoSuchFile = 2,
    /// SSH_FX_PERMISSION_DENIED - Permission denied
    PermissionDenied = 3,
    /// SSH_FX_FAILURE - General failure
    Failure = 4,
    /// SSH_FX_BAD_MESSAGE - Bad message
    BadMessage = 5,
    /// SSH_FX_NO_CONNECTION - No connection
    NoConnection = 6,
    /// SSH_FX_CONNECTION_LOST - Connection lost
    ConnectionLost = 7,
    /// SSH_FX_OP_UNSUPPORTED - Operation not supported
    OpUnsupported = 8,
}

impl StatusCode {
    /// Convert from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Eof),
            2 => Some(Self::NoSuchFile),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::Failure),
            5 => Some(Self::BadMessage),
            6 => Some(Self::NoConnection),
            7 => Some(Self::ConnectionLost),
            8 => Some(Self::OpUnsupported),
            _ => None,
        }
    }

    /// Returns the canonical message for this code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file or directory",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation not supported",
        }
    }

    /// Maps a local OS error to the closest status code.
    ///
    /// Anything without a close match becomes `Failure`; the caller attaches
    /// the OS message text so the peer still sees the detail.
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NoSuchFile,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::UnexpectedEof => Self::Eof,
            io::ErrorKind::Unsupported => Self::OpUnsupported,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionLost,
            _ => Self::Failure,
        }
    }
}

/// File open flags (SSH_FXF_*).
///
/// Unknown bits received from a peer are ignored when mapping to local
/// OS flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// SSH_FXF_READ - Open for reading
    pub const READ: u32 = 0x00000001;
    /// SSH_FXF_WRITE - Open for writing
    pub const WRITE: u32 = 0x00000002;
    /// SSH_FXF_APPEND - Force writes to append
    pub const APPEND: u32 = 0x00000004;
    /// SSH_FXF_CREAT - Create if the file does not exist
    pub const CREAT: u32 = 0x00000008;
    /// SSH_FXF_TRUNC - Truncate to zero length
    pub const TRUNC: u32 = 0x00000010;
    /// SSH_FXF_EXCL - Fail if the file exists
    pub const EXCL: u32 = 0x00000020;

    /// Flags for plain reading.
    pub fn read() -> Self {
        Self(Self::READ)
    }

    /// Flags for create-or-truncate writing.
    pub fn create() -> Self {
        Self(Self::WRITE | Self::CREAT | Self::TRUNC)
    }

    /// Flags for appending, creating if absent.
    pub fn append() -> Self {
        Self(Self::WRITE | Self::APPEND | Self::CREAT)
    }

    /// Tests a flag bit.
    pub fn contains(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    /// True when the flags permit any mutation of the file.
    pub fn is_mutating(&self) -> bool {
        self.contains(Self::WRITE)
            || self.contains(Self::APPEND)
            || self.contains(Self::CREAT)
            || self.contains(Self::TRUNC)
            || self.contains(Self::EXCL)
    }

    /// Maps the SFTP flag set to local open semantics, ignoring unknown bits.
    pub fn to_open_mode(&self, mode: Option<u32>) -> OpenMode {
        OpenMode {
            read: self.contains(Self::READ),
            // O_APPEND implies write intent even when WRITE is unset.
            write: self.contains(Self::WRITE) && !self.contains(Self::APPEND),
            append: self.contains(Self::APPEND),
            create: self.contains(Self::CREAT) && !self.contains(Self::EXCL),
            truncate: self.contains(Self::TRUNC),
            create_new: self.contains(Self::EXCL),
            mode,
        }
    }
}

/// File attribute flags (SSH_FILEXFER_ATTR_*).
#[derive(Debug, Clone, Copy)]
pub struct AttrFlags;

impl AttrFlags {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x00000001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x00000002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x00000004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x00000008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x80000000;
}

/// File type derived from mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Anything else (socket, fifo, device)
    Special,
    /// Permissions absent, type unknown
    Unknown,
}

/// Sparse file attributes.
///
/// The flag word decides which fields are present; absent fields occupy no
/// wire bytes. Extended attributes keep their wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// User ID
    pub uid: Option<u32>,
    /// Group ID
    pub gid: Option<u32>,
    /// POSIX mode bits, possibly including file-type bits
    pub permissions: Option<u32>,
    /// Access time, seconds since the epoch
    pub atime: Option<u32>,
    /// Modification time, seconds since the epoch
    pub mtime: Option<u32>,
    /// Ordered (name, value) extended attribute pairs
    pub extended: Vec<(String, Vec<u8>)>,
}

impl FileAttributes {
    /// Creates empty attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds attributes from a local stat result.
    pub fn from_stat(st: &FileStat) -> Self {
        Self {
            size: Some(st.size),
            uid: Some(st.uid),
            gid: Some(st.gid),
            permissions: Some(st.mode),
            atime: Some(st.atime),
            mtime: Some(st.mtime),
            extended: Vec::new(),
        }
    }

    /// The file type encoded in the permission bits, if present.
    pub fn file_type(&self) -> FileType {
        use sealink_platform::fs::{S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};

        match self.permissions {
            None => FileType::Unknown,
            Some(mode) => match mode & S_IFMT {
                S_IFREG => FileType::Regular,
                S_IFDIR => FileType::Directory,
                S_IFLNK => FileType::Symlink,
                0 => FileType::Unknown,
                _ => FileType::Special,
            },
        }
    }

    /// True when the attributes describe a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    /// True when the attributes describe a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }

    fn flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= AttrFlags::EXTENDED;
        }
        flags
    }

    /// Encodes the flag word and present fields in wire order.
    pub fn encode(&self, w: &mut WireWriter) {
        let flags = self.flags();
        w.put_u32(flags);
        if let Some(size) = self.size {
            w.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            w.put_u32(uid);
            w.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            w.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            w.put_u32(atime);
            w.put_u32(mtime);
        }
        if !self.extended.is_empty() {
            w.put_u32(self.extended.len() as u32);
            for (name, value) in &self.extended {
                w.put_string(name);
                w.put_bytes(value);
            }
        }
    }

    /// Decodes attributes, consuming exactly the fields the flag word names.
    pub fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let flags = r.read_u32("attr flags")?;
        let mut attrs = Self::new();

        if flags & AttrFlags::SIZE != 0 {
            attrs.size = Some(r.read_u64("attr size")?);
        }
        if flags & AttrFlags::UIDGID != 0 {
            attrs.uid = Some(r.read_u32("attr uid")?);
            attrs.gid = Some(r.read_u32("attr gid")?);
        }
        if flags & AttrFlags::PERMISSIONS != 0 {
            attrs.permissions = Some(r.read_u32("attr permissions")?);
        }
        if flags & AttrFlags::ACMODTIME != 0 {
            attrs.atime = Some(r.read_u32("attr atime")?);
            attrs.mtime = Some(r.read_u32("attr mtime")?);
        }
        if flags & AttrFlags::EXTENDED != 0 {
            let count = r.read_u32("attr extended count")?;
            for _ in 0..count {
                let name = r.read_string("attr extended name")?;
                let value = r.read_bytes("attr extended value")?;
                attrs.extended.push((name, value.to_vec()));
            }
        }

        // Bits beyond the v3 set would shift field layout; reject rather
        // than misparse.
        let known = AttrFlags::SIZE
            | AttrFlags::UIDGID
            | AttrFlags::PERMISSIONS
            | AttrFlags::ACMODTIME
            | AttrFlags::EXTENDED;
        if flags & !known != 0 {
            return Err(Error::BadMessage(format!(
                "unknown attribute flags {:#010x}",
                flags & !known
            )));
        }

        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(attrs: &FileAttributes) -> FileAttributes {
        let mut w = WireWriter::new();
        attrs.encode(&mut w);
        let body = w.into_body();
        let mut r = WireReader::new(&body);
        let decoded = FileAttributes::decode(&mut r).unwrap();
        r.finish("attrs").unwrap();
        decoded
    }

    #[test]
    fn test_status_code_conversion() {
        assert_eq!(StatusCode::from_u32(0), Some(StatusCode::Ok));
        assert_eq!(StatusCode::from_u32(2), Some(StatusCode::NoSuchFile));
        assert_eq!(StatusCode::from_u32(999), None);
    }

    #[test]
    fn test_io_error_mapping() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(StatusCode::from_io_error(&err), StatusCode::NoSuchFile);
        let err = io::Error::new(io::ErrorKind::AlreadyExists, "there");
        assert_eq!(StatusCode::from_io_error(&err), StatusCode::Failure);
    }

    #[test]
    fn test_attrs_roundtrip_every_flag_combination() {
        for mask in 0u32..16 {
            let attrs = FileAttributes {
                size: (mask & 1 != 0).then_some(0x1_0000_0001),
                uid: (mask & 2 != 0).then_some(1000),
                gid: (mask & 2 != 0).then_some(100),
                permissions: (mask & 4 != 0).then_some(0o100644),
                atime: (mask & 8 != 0).then_some(1_700_000_000),
                mtime: (mask & 8 != 0).then_some(1_700_000_001),
                extended: Vec::new(),
            };
            assert_eq!(roundtrip(&attrs), attrs, "flag mask {:#x}", mask);
        }
    }

    #[test]
    fn test_attrs_roundtrip_extended_pairs_keep_order() {
        let attrs = FileAttributes {
            extended: vec![
                ("zzz".to_string(), b"1".to_vec()),
                ("aaa".to_string(), vec![0, 1, 2]),
            ],
            ..Default::default()
        };
        assert_eq!(roundtrip(&attrs), attrs);
    }

    #[test]
    fn test_absent_fields_occupy_no_bytes() {
        let mut w = WireWriter::new();
        FileAttributes::new().encode(&mut w);
        assert_eq!(w.len(), 4); // flag word only
    }

    #[test]
    fn test_unknown_attr_flags_rejected() {
        let mut w = WireWriter::new();
        w.put_u32(0x0000_0100);
        let body = w.into_body();
        let mut r = WireReader::new(&body);
        assert!(matches!(
            FileAttributes::decode(&mut r).unwrap_err(),
            Error::BadMessage(_)
        ));
    }

    #[test]
    fn test_open_flags_mapping() {
        let flags = OpenFlags(OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREAT | 0x8000);
        let how = flags.to_open_mode(Some(0o644));
        assert!(how.read && how.write && how.create);
        assert!(!how.append && !how.truncate && !how.create_new);
        assert_eq!(how.mode, Some(0o644));
    }

    #[test]
    fn test_file_type_from_permissions() {
        let mut attrs = FileAttributes::new();
        assert_eq!(attrs.file_type(), FileType::Unknown);
        attrs.permissions = Some(0o040755);
        assert!(attrs.is_dir());
        attrs.permissions = Some(0o120777);
        assert!(attrs.is_symlink());
    }
}
