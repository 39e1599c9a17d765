//! SFTP packet codec.
//!
//! The outermost frame is a 32-bit big-endian length followed by a one-byte
//! type tag and the body. Every packet except INIT/VERSION carries a 32-bit
//! request identifier directly after the tag.
//!
//! ```text
//! uint32    length        (type + body, excludes the length field itself)
//! byte      type
//! uint32    request-id    (absent for INIT and VERSION)
//! ...       body
//! ```
//!
//! Encoders pre-compute the frame length and assemble the whole frame in one
//! buffer so the writer task can issue a single vectored-free write. Decoders
//! are length-strict: a frame with missing or trailing bytes fails with a
//! bad-message error.

use super::error::{Error, Result};
use super::extensions::Extension;
use super::types::{FileAttributes, OpenFlags, StatusCode};
use super::wire::{WireReader, WireWriter};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Protocol version this implementation speaks.
pub const SFTP_VERSION: u32 = 3;

/// Default cap on a single packet frame (type byte + body).
///
/// Matches the limit OpenSSH applies to sftp-server payloads.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024;

/// SFTP packet type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// SSH_FXP_INIT
    Init = 1,
    /// SSH_FXP_VERSION
    Version = 2,
    /// SSH_FXP_OPEN
    Open = 3,
    /// SSH_FXP_CLOSE
    Close = 4,
    /// SSH_FXP_READ
    Read = 5,
    /// SSH_FXP_WRITE
    Write = 6,
    /// SSH_FXP_LSTAT
    Lstat = 7,
    /// SSH_FXP_FSTAT
    Fstat = 8,
    /// SSH_FXP_SETSTAT
    SetStat = 9,
    /// SSH_FXP_FSETSTAT
    FSetStat = 10,
    /// SSH_FXP_OPENDIR
    OpenDir = 11,
    /// SSH_FXP_READDIR
    ReadDir = 12,
    /// SSH_FXP_REMOVE
    Remove = 13,
    /// SSH_FXP_MKDIR
    Mkdir = 14,
    /// SSH_FXP_RMDIR
    Rmdir = 15,
    /// SSH_FXP_REALPATH
    RealPath = 16,
    /// SSH_FXP_STAT
    Stat = 17,
    /// SSH_FXP_RENAME
    Rename = 18,
    /// SSH_FXP_READLINK
    ReadLink = 19,
    /// SSH_FXP_SYMLINK
    Symlink = 20,
    /// SSH_FXP_STATUS
    Status = 101,
    /// SSH_FXP_HANDLE
    Handle = 102,
    /// SSH_FXP_DATA
    Data = 103,
    /// SSH_FXP_NAME
    Name = 104,
    /// SSH_FXP_ATTRS
    Attrs = 105,
    /// SSH_FXP_EXTENDED
    Extended = 200,
    /// SSH_FXP_EXTENDED_REPLY
    ExtendedReply = 201,
}

impl PacketType {
    /// Convert from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Init),
            2 => Some(Self::Version),
            3 => Some(Self::Open),
            4 => Some(Self::Close),
            5 => Some(Self::Read),
            6 => Some(Self::Write),
            7 => Some(Self::Lstat),
            8 => Some(Self::Fstat),
            9 => Some(Self::SetStat),
            10 => Some(Self::FSetStat),
            11 => Some(Self::OpenDir),
            12 => Some(Self::ReadDir),
            13 => Some(Self::Remove),
            14 => Some(Self::Mkdir),
            15 => Some(Self::Rmdir),
            16 => Some(Self::RealPath),
            17 => Some(Self::Stat),
            18 => Some(Self::Rename),
            19 => Some(Self::ReadLink),
            20 => Some(Self::Symlink),
            101 => Some(Self::Status),
            102 => Some(Self::Handle),
            103 => Some(Self::Data),
            104 => Some(Self::Name),
            105 => Some(Self::Attrs),
            200 => Some(Self::Extended),
            201 => Some(Self::ExtendedReply),
            _ => None,
        }
    }

    /// True for the 19 request kinds plus EXTENDED.
    pub fn is_request(&self) -> bool {
        matches!(*self as u8, 3..=20 | 200)
    }
}

/// A decoded request body.
///
/// The single decoder returns this tagged variant; server dispatch is a
/// match over the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Open or create a file.
    Open {
        /// Remote path.
        path: String,
        /// SSH_FXF_* bits.
        flags: OpenFlags,
        /// Attributes to apply on creation.
        attrs: FileAttributes,
    },
    /// Release a file or directory handle.
    Close {
        /// Handle issued by the server.
        handle: Bytes,
    },
    /// Read a byte range from an open file.
    Read {
        /// Handle issued by the server.
        handle: Bytes,
        /// Absolute offset in the file.
        offset: u64,
        /// Maximum number of bytes wanted.
        len: u32,
    },
    /// Write a byte range to an open file.
    Write {
        /// Handle issued by the server.
        handle: Bytes,
        /// Absolute offset in the file.
        offset: u64,
        /// Payload to write.
        data: Bytes,
    },
    /// Stat without following symlinks.
    Lstat {
        /// Remote path.
        path: String,
    },
    /// Stat an open handle.
    Fstat {
        /// Handle issued by the server.
        handle: Bytes,
    },
    /// Apply attributes to a path.
    SetStat {
        /// Remote path.
        path: String,
        /// Attributes to apply.
        attrs: FileAttributes,
    },
    /// Apply attributes to an open handle.
    FSetStat {
        /// Handle issued by the server.
        handle: Bytes,
        /// Attributes to apply.
        attrs: FileAttributes,
    },
    /// Open a directory for iteration.
    OpenDir {
        /// Remote path.
        path: String,
    },
    /// Pull the next batch of directory entries.
    ReadDir {
        /// Handle issued by the server.
        handle: Bytes,
    },
    /// Remove a file.
    Remove {
        /// Remote path.
        path: String,
    },
    /// Create a directory.
    Mkdir {
        /// Remote path.
        path: String,
        /// Attributes to apply on creation.
        attrs: FileAttributes,
    },
    /// Remove an empty directory.
    Rmdir {
        /// Remote path.
        path: String,
    },
    /// Canonicalize a path.
    RealPath {
        /// Remote path.
        path: String,
    },
    /// Stat following symlinks.
    Stat {
        /// Remote path.
        path: String,
    },
    /// Rename a file or directory.
    Rename {
        /// Existing path.
        oldpath: String,
        /// New path.
        newpath: String,
    },
    /// Read a symlink's target.
    ReadLink {
        /// Remote path.
        path: String,
    },
    /// Create a symbolic link.
    ///
    /// The version-3 argument order is ambiguous across implementations;
    /// both fields are carried verbatim and the server decides which is the
    /// link target.
    Symlink {
        /// First wire argument (target under the OpenSSH convention).
        first: String,
        /// Second wire argument (link path under the OpenSSH convention).
        second: String,
    },
    /// Vendor extension request.
    Extended {
        /// Extension name, e.g. `posix-rename@openssh.com`.
        name: String,
        /// Request-specific trailing bytes.
        data: Bytes,
    },
}

impl Request {
    /// The wire tag for this request.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Request::Open { .. } => PacketType::Open,
            Request::Close { .. } => PacketType::Close,
            Request::Read { .. } => PacketType::Read,
            Request::Write { .. } => PacketType::Write,
            Request::Lstat { .. } => PacketType::Lstat,
            Request::Fstat { .. } => PacketType::Fstat,
            Request::SetStat { .. } => PacketType::SetStat,
            Request::FSetStat { .. } => PacketType::FSetStat,
            Request::OpenDir { .. } => PacketType::OpenDir,
            Request::ReadDir { .. } => PacketType::ReadDir,
            Request::Remove { .. } => PacketType::Remove,
            Request::Mkdir { .. } => PacketType::Mkdir,
            Request::Rmdir { .. } => PacketType::Rmdir,
            Request::RealPath { .. } => PacketType::RealPath,
            Request::Stat { .. } => PacketType::Stat,
            Request::Rename { .. } => PacketType::Rename,
            Request::ReadLink { .. } => PacketType::ReadLink,
            Request::Symlink { .. } => PacketType::Symlink,
            Request::Extended { .. } => PacketType::Extended,
        }
    }

    /// Encodes the request as a complete frame carrying `id`.
    pub fn encode(&self, id: u32) -> Bytes {
        let mut w = match self {
            Request::Write { data, .. } => WireWriter::with_capacity(data.len() + 64),
            _ => WireWriter::new(),
        };
        w.put_u32(id);
        match self {
            Request::Open { path, flags, attrs } => {
                w.put_string(path).put_u32(flags.0);
                attrs.encode(&mut w);
            }
            Request::Close { handle }
            | Request::Fstat { handle }
            | Request::ReadDir { handle } => {
                w.put_bytes(handle);
            }
            Request::Read {
                handle,
                offset,
                len,
            } => {
                w.put_bytes(handle).put_u64(*offset).put_u32(*len);
            }
            Request::Write {
                handle,
                offset,
                data,
            } => {
                w.put_bytes(handle).put_u64(*offset).put_bytes(data);
            }
            Request::Lstat { path }
            | Request::OpenDir { path }
            | Request::Remove { path }
            | Request::Rmdir { path }
            | Request::RealPath { path }
            | Request::Stat { path }
            | Request::ReadLink { path } => {
                w.put_string(path);
            }
            Request::SetStat { path, attrs } => {
                w.put_string(path);
                attrs.encode(&mut w);
            }
            Request::FSetStat { handle, attrs } => {
                w.put_bytes(handle);
                attrs.encode(&mut w);
            }
            Request::Mkdir { path, attrs } => {
                w.put_string(path);
                attrs.encode(&mut w);
            }
            Request::Rename { oldpath, newpath } => {
                w.put_string(oldpath).put_string(newpath);
            }
            Request::Symlink { first, second } => {
                w.put_string(first).put_string(second);
            }
            Request::Extended { name, data } => {
                // Extension payloads are raw trailing bytes, not
                // length-prefixed buffers.
                w.put_string(name).put_raw(data);
            }
        }
        w.into_frame(self.packet_type() as u8)
    }

    /// Decodes a request body. The reader must be positioned after the
    /// request identifier; the body must be consumed exactly.
    pub fn decode(ptype: PacketType, mut r: WireReader<'_>) -> Result<Self> {
        let req = match ptype {
            PacketType::Open => Request::Open {
                path: r.read_string("open path")?,
                flags: OpenFlags(r.read_u32("open flags")?),
                attrs: FileAttributes::decode(&mut r)?,
            },
            PacketType::Close => Request::Close {
                handle: r.read_bytes("close handle")?,
            },
            PacketType::Read => Request::Read {
                handle: r.read_bytes("read handle")?,
                offset: r.read_u64("read offset")?,
                len: r.read_u32("read length")?,
            },
            PacketType::Write => Request::Write {
                handle: r.read_bytes("write handle")?,
                offset: r.read_u64("write offset")?,
                data: r.read_bytes("write data")?,
            },
            PacketType::Lstat => Request::Lstat {
                path: r.read_string("lstat path")?,
            },
            PacketType::Fstat => Request::Fstat {
                handle: r.read_bytes("fstat handle")?,
            },
            PacketType::SetStat => Request::SetStat {
                path: r.read_string("setstat path")?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            PacketType::FSetStat => Request::FSetStat {
                handle: r.read_bytes("fsetstat handle")?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            PacketType::OpenDir => Request::OpenDir {
                path: r.read_string("opendir path")?,
            },
            PacketType::ReadDir => Request::ReadDir {
                handle: r.read_bytes("readdir handle")?,
            },
            PacketType::Remove => Request::Remove {
                path: r.read_string("remove path")?,
            },
            PacketType::Mkdir => Request::Mkdir {
                path: r.read_string("mkdir path")?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            PacketType::Rmdir => Request::Rmdir {
                path: r.read_string("rmdir path")?,
            },
            PacketType::RealPath => Request::RealPath {
                path: r.read_string("realpath path")?,
            },
            PacketType::Stat => Request::Stat {
                path: r.read_string("stat path")?,
            },
            PacketType::Rename => Request::Rename {
                oldpath: r.read_string("rename oldpath")?,
                newpath: r.read_string("rename newpath")?,
            },
            PacketType::ReadLink => Request::ReadLink {
                path: r.read_string("readlink path")?,
            },
            PacketType::Symlink => Request::Symlink {
                first: r.read_string("symlink first path")?,
                second: r.read_string("symlink second path")?,
            },
            PacketType::Extended => {
                let name = r.read_string("extended name")?;
                let data = r.rest();
                return Ok(Request::Extended { name, data });
            }
            other => {
                return Err(Error::BadMessage(format!(
                    "packet type {:?} is not a request",
                    other
                )))
            }
        };
        r.finish("request body")?;
        Ok(req)
    }
}

/// One entry of a NAME response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    /// Bare file name, or a full path for REALPATH replies.
    pub filename: String,
    /// `ls -l` style presentation line.
    pub longname: String,
    /// Attributes of the entry.
    pub attrs: FileAttributes,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// SSH_FXP_STATUS: completion status for a request.
    Status {
        /// Result code.
        code: StatusCode,
        /// Human-readable message (may be empty).
        message: String,
    },
    /// SSH_FXP_HANDLE: a fresh file or directory handle.
    Handle {
        /// Opaque handle bytes, at most 256 octets.
        handle: Bytes,
    },
    /// SSH_FXP_DATA: bytes read from a file.
    Data {
        /// Payload; shorter than requested only at end of file.
        data: Bytes,
    },
    /// SSH_FXP_NAME: directory entries or a resolved path.
    Name {
        /// Entries in server order.
        entries: Vec<NameEntry>,
    },
    /// SSH_FXP_ATTRS: a stat result.
    Attrs {
        /// The attributes.
        attrs: FileAttributes,
    },
    /// SSH_FXP_EXTENDED_REPLY: extension-specific payload.
    ExtendedReply {
        /// Raw trailing bytes, decoded by the extension's caller.
        data: Bytes,
    },
}

impl Response {
    /// The wire tag for this response.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Response::Status { .. } => PacketType::Status,
            Response::Handle { .. } => PacketType::Handle,
            Response::Data { .. } => PacketType::Data,
            Response::Name { .. } => PacketType::Name,
            Response::Attrs { .. } => PacketType::Attrs,
            Response::ExtendedReply { .. } => PacketType::ExtendedReply,
        }
    }

    /// Encodes the response as a complete frame echoing `id`.
    pub fn encode(&self, id: u32) -> Bytes {
        let mut w = match self {
            Response::Data { data } => WireWriter::with_capacity(data.len() + 16),
            _ => WireWriter::new(),
        };
        w.put_u32(id);
        match self {
            Response::Status { code, message } => {
                w.put_u32(*code as u32).put_string(message).put_string("");
            }
            Response::Handle { handle } => {
                w.put_bytes(handle);
            }
            Response::Data { data } => {
                w.put_bytes(data);
            }
            Response::Name { entries } => {
                w.put_u32(entries.len() as u32);
                for entry in entries {
                    w.put_string(&entry.filename).put_string(&entry.longname);
                    entry.attrs.encode(&mut w);
                }
            }
            Response::Attrs { attrs } => {
                attrs.encode(&mut w);
            }
            Response::ExtendedReply { data } => {
                w.put_raw(data);
            }
        }
        w.into_frame(self.packet_type() as u8)
    }

    /// Decodes a response body positioned after the request identifier.
    pub fn decode(ptype: PacketType, mut r: WireReader<'_>) -> Result<Self> {
        let resp = match ptype {
            PacketType::Status => {
                let raw = r.read_u32("status code")?;
                let code = StatusCode::from_u32(raw).ok_or_else(|| {
                    Error::BadMessage(format!("unknown status code {}", raw))
                })?;
                // Early-v3 peers omit the message and language fields.
                let message = if r.remaining() > 0 {
                    r.read_string("status message")?
                } else {
                    String::new()
                };
                if r.remaining() > 0 {
                    let _lang = r.read_string("status language")?;
                }
                Response::Status { code, message }
            }
            PacketType::Handle => Response::Handle {
                handle: r.read_bytes("handle")?,
            },
            PacketType::Data => Response::Data {
                data: r.read_bytes("data")?,
            },
            PacketType::Name => {
                let count = r.read_u32("name count")? as usize;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let filename = r.read_string("name filename")?;
                    let longname = r.read_string("name longname")?;
                    let attrs = FileAttributes::decode(&mut r)?;
                    entries.push(NameEntry {
                        filename,
                        longname,
                        attrs,
                    });
                }
                Response::Name { entries }
            }
            PacketType::Attrs => Response::Attrs {
                attrs: FileAttributes::decode(&mut r)?,
            },
            PacketType::ExtendedReply => {
                return Ok(Response::ExtendedReply { data: r.rest() });
            }
            other => {
                return Err(Error::BadMessage(format!(
                    "packet type {:?} is not a response",
                    other
                )))
            }
        };
        r.finish("response body")?;
        Ok(resp)
    }
}

/// Version handshake contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Negotiated or offered protocol version.
    pub version: u32,
    /// Extension pairs advertised alongside the version.
    pub extensions: Vec<Extension>,
}

/// Encodes an SSH_FXP_INIT frame.
pub fn encode_init(version: u32) -> Bytes {
    let mut w = WireWriter::new();
    w.put_u32(version);
    w.into_frame(PacketType::Init as u8)
}

/// Encodes an SSH_FXP_VERSION frame with extension pairs.
pub fn encode_version(version: u32, extensions: &[Extension]) -> Bytes {
    let mut w = WireWriter::new();
    w.put_u32(version);
    for ext in extensions {
        w.put_string(&ext.name).put_string(&ext.data);
    }
    w.into_frame(PacketType::Version as u8)
}

/// Decodes the body of an INIT or VERSION frame.
///
/// Both carry a version word followed by zero or more extension pairs.
pub fn decode_version_body(body: &[u8]) -> Result<VersionInfo> {
    let mut r = WireReader::new(body);
    let version = r.read_u32("protocol version")?;
    let mut extensions = Vec::new();
    while r.remaining() > 0 {
        let name = r.read_string("extension name")?;
        let data = r.read_string("extension data")?;
        extensions.push(Extension { name, data });
    }
    Ok(VersionInfo {
        version,
        extensions,
    })
}

/// Reads one frame, returning the type byte and body.
///
/// Returns `Ok(None)` on clean end of stream. A frame longer than
/// `max_size` or shorter than its own header is a bad-message error.
pub async fn read_frame<R>(stream: &mut R, max_size: usize) -> Result<Option<(u8, Bytes)>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::BadMessage("zero-length frame".to_string()));
    }
    if len > max_size {
        return Err(Error::BadMessage(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len, max_size
        )));
    }

    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::BadMessage("stream ended inside a frame".to_string())
        } else {
            Error::Io(e)
        }
    })?;
    let packet_type = frame[0];
    let body = Bytes::from(frame).slice(1..);
    Ok(Some((packet_type, body)))
}

/// Reads one frame into a caller-provided buffer (an allocator page).
///
/// Returns the type byte and the body length; the body occupies
/// `buf[..body_len]`. Frames larger than the buffer are bad-message errors,
/// which the caller prevents by sizing pages at the packet cap.
pub async fn read_frame_into<R>(
    stream: &mut R,
    buf: &mut [u8],
) -> Result<Option<(u8, usize)>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::BadMessage("zero-length frame".to_string()));
    }
    if len > buf.len() + 1 {
        return Err(Error::BadMessage(format!(
            "frame of {} bytes exceeds the {} byte page",
            len,
            buf.len()
        )));
    }

    let mut type_buf = [0u8; 1];
    stream
        .read_exact(&mut type_buf)
        .await
        .map_err(|e| Error::BadMessage(format!("stream ended inside a frame: {}", e)))?;
    let body_len = len - 1;
    stream
        .read_exact(&mut buf[..body_len])
        .await
        .map_err(|e| Error::BadMessage(format!("stream ended inside a frame: {}", e)))?;
    Ok(Some((type_buf[0], body_len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_request_frame(frame: &[u8]) -> (u32, Request) {
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        let ptype = PacketType::from_u8(frame[4]).unwrap();
        let mut r = WireReader::new(&frame[5..]);
        let id = r.read_u32("id").unwrap();
        (id, Request::decode(ptype, r).unwrap())
    }

    fn decode_response_frame(frame: &[u8]) -> (u32, Response) {
        let ptype = PacketType::from_u8(frame[4]).unwrap();
        let mut r = WireReader::new(&frame[5..]);
        let id = r.read_u32("id").unwrap();
        (id, Response::decode(ptype, r).unwrap())
    }

    fn attrs_sample() -> FileAttributes {
        FileAttributes {
            size: Some(999),
            permissions: Some(0o100644),
            atime: Some(1_700_000_000),
            mtime: Some(1_700_000_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_request_kind_roundtrips() {
        let handle = Bytes::from_static(b"00aabbcc00112233");
        let requests = vec![
            Request::Open {
                path: "/tmp/file".into(),
                flags: OpenFlags::create(),
                attrs: attrs_sample(),
            },
            Request::Close {
                handle: handle.clone(),
            },
            Request::Read {
                handle: handle.clone(),
                offset: 1 << 33,
                len: 32768,
            },
            Request::Write {
                handle: handle.clone(),
                offset: 0,
                data: Bytes::from_static(b"payload"),
            },
            Request::Lstat {
                path: "/tmp".into(),
            },
            Request::Fstat {
                handle: handle.clone(),
            },
            Request::SetStat {
                path: "/tmp/file".into(),
                attrs: attrs_sample(),
            },
            Request::FSetStat {
                handle: handle.clone(),
                attrs: attrs_sample(),
            },
            Request::OpenDir {
                path: "/tmp".into(),
            },
            Request::ReadDir {
                handle: handle.clone(),
            },
            Request::Remove {
                path: "/tmp/file".into(),
            },
            Request::Mkdir {
                path: "/tmp/dir".into(),
                attrs: FileAttributes::new(),
            },
            Request::Rmdir {
                path: "/tmp/dir".into(),
            },
            Request::RealPath { path: ".".into() },
            Request::Stat {
                path: "/tmp".into(),
            },
            Request::Rename {
                oldpath: "/a".into(),
                newpath: "/b".into(),
            },
            Request::ReadLink {
                path: "/link".into(),
            },
            Request::Symlink {
                first: "/target".into(),
                second: "/link".into(),
            },
            Request::Extended {
                name: "posix-rename@openssh.com".into(),
                data: {
                    let mut w = WireWriter::new();
                    w.put_string("/a").put_string("/b");
                    w.into_body()
                },
            },
        ];

        for (i, req) in requests.into_iter().enumerate() {
            let frame = req.encode(i as u32 + 1);
            let (id, decoded) = decode_request_frame(&frame);
            assert_eq!(id, i as u32 + 1);
            assert_eq!(decoded, req);
        }
    }

    #[test]
    fn test_every_response_kind_roundtrips() {
        let responses = vec![
            Response::Status {
                code: StatusCode::Ok,
                message: "Success".into(),
            },
            Response::Handle {
                handle: Bytes::from_static(b"deadbeef"),
            },
            Response::Data {
                data: Bytes::from_static(b"\x00\x01\x02"),
            },
            Response::Name {
                entries: vec![NameEntry {
                    filename: "file.txt".into(),
                    longname: "-rw-r--r--    1 0        0             999 Jan  1 00:00 file.txt"
                        .into(),
                    attrs: attrs_sample(),
                }],
            },
            Response::Attrs {
                attrs: attrs_sample(),
            },
            Response::ExtendedReply {
                data: Bytes::from_static(b"\x00\x00\x00\x01"),
            },
        ];

        for (i, resp) in responses.into_iter().enumerate() {
            let frame = resp.encode(i as u32 + 100);
            let (id, decoded) = decode_response_frame(&frame);
            assert_eq!(id, i as u32 + 100);
            assert_eq!(decoded, resp);
        }
    }

    #[test]
    fn test_trailing_bytes_fail_decoding() {
        let mut w = WireWriter::new();
        w.put_bytes(b"handle");
        w.put_u32(99); // junk after the CLOSE body
        let body = w.into_body();
        let r = WireReader::new(&body);
        assert!(matches!(
            Request::decode(PacketType::Close, r).unwrap_err(),
            Error::BadMessage(_)
        ));
    }

    #[test]
    fn test_version_handshake_roundtrip() {
        let exts = vec![
            Extension {
                name: "posix-rename@openssh.com".into(),
                data: "1".into(),
            },
            Extension {
                name: "limits@openssh.com".into(),
                data: "1".into(),
            },
        ];
        let frame = encode_version(3, &exts);
        assert_eq!(frame[4], PacketType::Version as u8);
        let info = decode_version_body(&frame[5..]).unwrap();
        assert_eq!(info.version, 3);
        assert_eq!(info.extensions, exts);
    }

    #[tokio::test]
    async fn test_read_frame_eof_and_limits() {
        // Clean EOF.
        let empty: &[u8] = &[];
        let mut cursor = std::io::Cursor::new(empty.to_vec());
        assert!(read_frame(&mut cursor, 1024).await.unwrap().is_none());

        // Oversized frame rejected before allocation.
        let mut cursor = std::io::Cursor::new(vec![0xff, 0xff, 0xff, 0xff, 1]);
        assert!(matches!(
            read_frame(&mut cursor, 1024).await.unwrap_err(),
            Error::BadMessage(_)
        ));

        // A round frame comes back intact.
        let frame = encode_init(3);
        let mut cursor = std::io::Cursor::new(frame.to_vec());
        let (ptype, body) = read_frame(&mut cursor, 1024).await.unwrap().unwrap();
        assert_eq!(ptype, PacketType::Init as u8);
        assert_eq!(decode_version_body(&body).unwrap().version, 3);
    }
}
