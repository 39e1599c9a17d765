//! SFTP client.
//!
//! [`SftpClient`] drives one session over a pre-authenticated byte stream
//! pair. Path operations are plain request/response calls through the
//! internal dispatcher; file I/O pipelines many outstanding chunk
//! requests, see [`file`].

pub mod dir;
mod dispatcher;
pub mod file;
mod transfer;

pub use dir::{WalkEntry, Walker};
pub use file::{FileReader, FileWriter, RemoteFile};

use self::dispatcher::Dispatcher;
use super::error::{Error, Result};
use super::extensions::{self, ExtensionSet};
use super::glob;
use super::packet::{NameEntry, Request, Response, DEFAULT_MAX_PACKET_SIZE, SFTP_VERSION};
use super::types::{FileAttributes, OpenFlags, StatusCode};
use super::wire::{WireReader, WireWriter};
use bytes::Bytes;
use sealink_platform::fs::StatVfs;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct SftpClientConfig {
    /// Largest frame accepted or produced.
    pub max_packet_size: usize,
    /// Maximum requests awaiting responses; enqueuers block at the cap.
    pub max_inflight: usize,
    /// Transfer chunk size for pipelined reads and writes.
    pub chunk_size: usize,
    /// Outstanding chunk requests per sequential stream.
    pub pipeline_depth: usize,
    /// Issue overlapping READ requests from sequential streams.
    pub concurrent_reads: bool,
    /// Issue overlapping WRITE requests from sequential streams.
    pub concurrent_writes: bool,
    /// Let sequential readers consult FSTAT to bound read-ahead at the
    /// file's size instead of probing past end of file.
    pub use_fstat: bool,
}

impl Default for SftpClientConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_inflight: 64,
            chunk_size: 32 * 1024,
            pipeline_depth: 64,
            concurrent_reads: true,
            concurrent_writes: true,
            use_fstat: false,
        }
    }
}

impl SftpClientConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the packet size cap.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Sets the in-flight request cap.
    pub fn with_max_inflight(mut self, max: usize) -> Self {
        self.max_inflight = max;
        self
    }

    /// Sets the transfer chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the per-stream pipeline depth.
    pub fn with_pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth;
        self
    }

    /// Enables or disables overlapping READs in sequential streams.
    pub fn with_concurrent_reads(mut self, enabled: bool) -> Self {
        self.concurrent_reads = enabled;
        self
    }

    /// Enables or disables overlapping WRITEs in sequential streams.
    pub fn with_concurrent_writes(mut self, enabled: bool) -> Self {
        self.concurrent_writes = enabled;
        self
    }

    /// Enables FSTAT-bounded read-ahead.
    pub fn with_use_fstat(mut self, enabled: bool) -> Self {
        self.use_fstat = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_inflight == 0 {
            return Err(Error::Config("max_inflight must be nonzero".to_string()));
        }
        if self.pipeline_depth == 0 || self.pipeline_depth > self.max_inflight {
            return Err(Error::Config(
                "pipeline_depth must be between 1 and max_inflight".to_string(),
            ));
        }
        if self.chunk_size < 512 || self.chunk_size + 1024 > self.max_packet_size {
            return Err(Error::Config(
                "chunk_size must fit the packet size cap with header room".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective pipeline depth given the concurrency switches.
    pub(crate) fn read_depth(&self) -> usize {
        if self.concurrent_reads {
            self.pipeline_depth
        } else {
            1
        }
    }

    pub(crate) fn write_depth(&self) -> usize {
        if self.concurrent_writes {
            self.pipeline_depth
        } else {
            1
        }
    }
}

/// SFTP client over a single session.
pub struct SftpClient {
    dispatcher: Arc<Dispatcher>,
    config: SftpClientConfig,
    version: u32,
    extensions: ExtensionSet,
}

impl SftpClient {
    /// Connects with the default configuration.
    pub async fn connect<R, W>(input: R, output: W) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::connect_with_config(input, output, SftpClientConfig::default()).await
    }

    /// Connects over a byte stream pair, performing the INIT/VERSION
    /// handshake and recording the server's extension pairs.
    pub async fn connect_with_config<R, W>(
        input: R,
        output: W,
        config: SftpClientConfig,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let (dispatcher, info) =
            Dispatcher::connect(input, output, config.max_packet_size, config.max_inflight)
                .await?;
        let version = SFTP_VERSION.min(info.version);
        let extensions = ExtensionSet::from_pairs(&info.extensions);
        debug!(version, "SFTP client ready");
        Ok(Self {
            dispatcher,
            config,
            version,
            extensions,
        })
    }

    /// The negotiated protocol version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Extension pairs the server advertised.
    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    /// The client configuration.
    pub fn config(&self) -> &SftpClientConfig {
        &self.config
    }

    /// Requests awaiting responses right now.
    pub fn pending_requests(&self) -> usize {
        self.dispatcher.pending_requests()
    }

    /// Shuts the session down. Outstanding requests resolve with
    /// connection-lost; the output half is closed so the server can drain.
    pub async fn close(&self) {
        self.dispatcher.close().await;
    }

    // Path operations

    /// Opens an existing file for reading.
    pub async fn open(&self, path: &str) -> Result<RemoteFile> {
        self.open_with(path, OpenFlags::read(), FileAttributes::new())
            .await
    }

    /// Creates or truncates a file for writing with mode 0644.
    pub async fn create(&self, path: &str) -> Result<RemoteFile> {
        let attrs = FileAttributes {
            permissions: Some(0o644),
            ..Default::default()
        };
        self.open_with(path, OpenFlags::create(), attrs).await
    }

    /// Opens a file with explicit flags and creation attributes.
    pub async fn open_with(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: FileAttributes,
    ) -> Result<RemoteFile> {
        let resp = self
            .dispatcher
            .call(Request::Open {
                path: path.to_string(),
                flags,
                attrs,
            })
            .await?;
        let handle = expect_handle(resp)?;
        Ok(RemoteFile::new(
            Arc::clone(&self.dispatcher),
            self.config.clone(),
            self.extensions.clone(),
            handle,
            path.to_string(),
        ))
    }

    /// Stats a path, following symlinks.
    pub async fn stat(&self, path: &str) -> Result<FileAttributes> {
        let resp = self
            .dispatcher
            .call(Request::Stat {
                path: path.to_string(),
            })
            .await?;
        expect_attrs(resp)
    }

    /// Stats a path without following symlinks.
    pub async fn lstat(&self, path: &str) -> Result<FileAttributes> {
        let resp = self
            .dispatcher
            .call(Request::Lstat {
                path: path.to_string(),
            })
            .await?;
        expect_attrs(resp)
    }

    /// Applies attributes to a path.
    pub async fn setstat(&self, path: &str, attrs: FileAttributes) -> Result<()> {
        let resp = self
            .dispatcher
            .call(Request::SetStat {
                path: path.to_string(),
                attrs,
            })
            .await?;
        expect_status(resp)
    }

    /// Changes permission bits.
    pub async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.setstat(
            path,
            FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            },
        )
        .await
    }

    /// Changes ownership.
    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.setstat(
            path,
            FileAttributes {
                uid: Some(uid),
                gid: Some(gid),
                ..Default::default()
            },
        )
        .await
    }

    /// Truncates or extends a file.
    pub async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.setstat(
            path,
            FileAttributes {
                size: Some(size),
                ..Default::default()
            },
        )
        .await
    }

    /// Sets access and modification times.
    pub async fn utimes(&self, path: &str, atime: u32, mtime: u32) -> Result<()> {
        self.setstat(
            path,
            FileAttributes {
                atime: Some(atime),
                mtime: Some(mtime),
                ..Default::default()
            },
        )
        .await
    }

    /// Renames a file or directory.
    ///
    /// Uses the `posix-rename@openssh.com` extension when the server
    /// advertises it (replacing an existing target atomically), and falls
    /// back to the standard RENAME otherwise.
    pub async fn rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        if self.extensions.supports(extensions::POSIX_RENAME) {
            let mut w = WireWriter::new();
            w.put_string(oldpath).put_string(newpath);
            let resp = self
                .dispatcher
                .call(Request::Extended {
                    name: extensions::POSIX_RENAME.to_string(),
                    data: w.into_body(),
                })
                .await?;
            return expect_status(resp);
        }
        let resp = self
            .dispatcher
            .call(Request::Rename {
                oldpath: oldpath.to_string(),
                newpath: newpath.to_string(),
            })
            .await?;
        expect_status(resp)
    }

    /// Removes a file.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let resp = self
            .dispatcher
            .call(Request::Remove {
                path: path.to_string(),
            })
            .await?;
        expect_status(resp)
    }

    /// Creates a directory.
    pub async fn mkdir(&self, path: &str, mode: Option<u32>) -> Result<()> {
        let resp = self
            .dispatcher
            .call(Request::Mkdir {
                path: path.to_string(),
                attrs: FileAttributes {
                    permissions: mode,
                    ..Default::default()
                },
            })
            .await?;
        expect_status(resp)
    }

    /// Removes an empty directory.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let resp = self
            .dispatcher
            .call(Request::Rmdir {
                path: path.to_string(),
            })
            .await?;
        expect_status(resp)
    }

    /// Creates a symbolic link at `link` pointing at `target`.
    ///
    /// Arguments go on the wire in the OpenSSH order: target first, link
    /// second.
    pub async fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let resp = self
            .dispatcher
            .call(Request::Symlink {
                first: target.to_string(),
                second: link.to_string(),
            })
            .await?;
        expect_status(resp)
    }

    /// Reads a symlink's target.
    pub async fn readlink(&self, path: &str) -> Result<String> {
        let resp = self
            .dispatcher
            .call(Request::ReadLink {
                path: path.to_string(),
            })
            .await?;
        let entries = expect_name(resp)?;
        entries
            .into_iter()
            .next()
            .map(|e| e.filename)
            .ok_or_else(|| Error::Protocol("empty READLINK reply".to_string()))
    }

    /// Resolves a path to canonical absolute form.
    pub async fn realpath(&self, path: &str) -> Result<String> {
        let resp = self
            .dispatcher
            .call(Request::RealPath {
                path: path.to_string(),
            })
            .await?;
        let entries = expect_name(resp)?;
        entries
            .into_iter()
            .next()
            .map(|e| e.filename)
            .ok_or_else(|| Error::Protocol("empty REALPATH reply".to_string()))
    }

    /// Creates a hard link via `hardlink@openssh.com`.
    pub async fn hardlink(&self, oldpath: &str, newpath: &str) -> Result<()> {
        if !self.extensions.supports(extensions::HARDLINK) {
            return Err(Error::status(
                StatusCode::OpUnsupported,
                "server does not support hardlink@openssh.com",
            ));
        }
        let mut w = WireWriter::new();
        w.put_string(oldpath).put_string(newpath);
        let resp = self
            .dispatcher
            .call(Request::Extended {
                name: extensions::HARDLINK.to_string(),
                data: w.into_body(),
            })
            .await?;
        expect_status(resp)
    }

    /// Queries filesystem statistics via `statvfs@openssh.com`.
    pub async fn statvfs(&self, path: &str) -> Result<StatVfs> {
        if !self.extensions.supports(extensions::STATVFS) {
            return Err(Error::status(
                StatusCode::OpUnsupported,
                "server does not support statvfs@openssh.com",
            ));
        }
        let mut w = WireWriter::new();
        w.put_string(path);
        let resp = self
            .dispatcher
            .call(Request::Extended {
                name: extensions::STATVFS.to_string(),
                data: w.into_body(),
            })
            .await?;
        let data = expect_extended_reply(resp)?;
        let mut r = WireReader::new(&data);
        let vfs = StatVfs {
            bsize: r.read_u64("statvfs bsize")?,
            frsize: r.read_u64("statvfs frsize")?,
            blocks: r.read_u64("statvfs blocks")?,
            bfree: r.read_u64("statvfs bfree")?,
            bavail: r.read_u64("statvfs bavail")?,
            files: r.read_u64("statvfs files")?,
            ffree: r.read_u64("statvfs ffree")?,
            favail: r.read_u64("statvfs favail")?,
            fsid: r.read_u64("statvfs fsid")?,
            flags: r.read_u64("statvfs flags")?,
            namemax: r.read_u64("statvfs namemax")?,
        };
        r.finish("statvfs reply")?;
        Ok(vfs)
    }

    /// Queries server limits via `limits@openssh.com`, if advertised.
    pub async fn limits(&self) -> Result<Limits> {
        if !self.extensions.supports(extensions::LIMITS) {
            return Err(Error::status(
                StatusCode::OpUnsupported,
                "server does not support limits@openssh.com",
            ));
        }
        let resp = self
            .dispatcher
            .call(Request::Extended {
                name: extensions::LIMITS.to_string(),
                data: Bytes::new(),
            })
            .await?;
        let data = expect_extended_reply(resp)?;
        let mut r = WireReader::new(&data);
        let limits = Limits {
            max_packet_length: r.read_u64("limits max-packet-length")?,
            max_read_length: r.read_u64("limits max-read-length")?,
            max_write_length: r.read_u64("limits max-write-length")?,
            max_open_handles: r.read_u64("limits max-open-handles")?,
        };
        r.finish("limits reply")?;
        Ok(limits)
    }

    /// Lists a directory in one shot, driving READDIR to EOF.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<NameEntry>> {
        let resp = self
            .dispatcher
            .call(Request::OpenDir {
                path: path.to_string(),
            })
            .await?;
        let handle = expect_handle(resp)?;

        let mut entries = Vec::new();
        let mut result = Ok(());
        loop {
            let resp = self
                .dispatcher
                .call(Request::ReadDir {
                    handle: handle.clone(),
                })
                .await;
            match resp {
                Ok(Response::Name { entries: batch }) => entries.extend(batch),
                Ok(Response::Status {
                    code: StatusCode::Eof,
                    ..
                }) => break,
                Ok(Response::Status { code, message }) => {
                    result = Err(Error::status(code, message));
                    break;
                }
                Ok(other) => {
                    result = Err(Error::Protocol(format!(
                        "unexpected READDIR reply {:?}",
                        other.packet_type()
                    )));
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        // Close the directory handle even after a failed batch.
        let close = self
            .dispatcher
            .call(Request::Close { handle })
            .await
            .and_then(expect_status);
        result?;
        close?;
        Ok(entries)
    }

    /// Starts a lazy depth-first walk rooted at `path`.
    pub fn walk(&self, path: &str) -> Walker<'_> {
        Walker::new(self, path)
    }

    /// Expands POSIX wildcards against remote listings.
    ///
    /// Returns matching paths in sorted order; a pattern without wildcards
    /// returns itself when the path exists.
    pub async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        if !glob::has_wildcards(pattern) {
            let literal = glob::unescape(pattern);
            return match self.lstat(&literal).await {
                Ok(_) => Ok(vec![literal]),
                Err(Error::Status { .. }) => Ok(Vec::new()),
                Err(e) => Err(e),
            };
        }

        let absolute = pattern.starts_with('/');
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let mut prefixes: Vec<String> = vec![if absolute {
            "/".to_string()
        } else {
            ".".to_string()
        }];

        for segment in segments {
            let mut next = Vec::new();
            if glob::has_wildcards(segment) {
                for prefix in &prefixes {
                    let listing = match self.read_dir(prefix).await {
                        Ok(listing) => listing,
                        Err(Error::Status { .. }) => continue,
                        Err(e) => return Err(e),
                    };
                    for entry in listing {
                        if entry.filename == "." || entry.filename == ".." {
                            continue;
                        }
                        if glob::matches(segment, &entry.filename) {
                            next.push(join_remote(prefix, &entry.filename));
                        }
                    }
                }
            } else {
                let literal = glob::unescape(segment);
                for prefix in &prefixes {
                    let candidate = join_remote(prefix, &literal);
                    match self.lstat(&candidate).await {
                        Ok(_) => next.push(candidate),
                        Err(Error::Status { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            prefixes = next;
            if prefixes.is_empty() {
                break;
            }
        }

        prefixes.sort();
        Ok(prefixes)
    }
}

/// Server limits advertised through `limits@openssh.com`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    /// Largest frame the server accepts.
    pub max_packet_length: u64,
    /// Largest READ payload the server returns.
    pub max_read_length: u64,
    /// Largest WRITE payload the server accepts.
    pub max_write_length: u64,
    /// Open-handle cap; zero means unlimited.
    pub max_open_handles: u64,
}

fn join_remote(prefix: &str, name: &str) -> String {
    match prefix {
        "." => name.to_string(),
        "/" => format!("/{}", name),
        _ => format!("{}/{}", prefix, name),
    }
}

pub(crate) fn expect_status(resp: Response) -> Result<()> {
    match resp {
        Response::Status {
            code: StatusCode::Ok,
            ..
        } => Ok(()),
        Response::Status { code, message } => Err(Error::status(code, message)),
        other => Err(Error::Protocol(format!(
            "expected STATUS, got {:?}",
            other.packet_type()
        ))),
    }
}

pub(crate) fn expect_handle(resp: Response) -> Result<Bytes> {
    match resp {
        Response::Handle { handle } => {
            if handle.len() > 256 {
                return Err(Error::Protocol(format!(
                    "handle of {} octets exceeds the 256-octet cap",
                    handle.len()
                )));
            }
            Ok(handle)
        }
        Response::Status { code, message } => Err(Error::status(code, message)),
        other => Err(Error::Protocol(format!(
            "expected HANDLE, got {:?}",
            other.packet_type()
        ))),
    }
}

/// `Ok(None)` means STATUS EOF.
pub(crate) fn expect_data(resp: Response) -> Result<Option<Bytes>> {
    match resp {
        Response::Data { data } => Ok(Some(data)),
        Response::Status {
            code: StatusCode::Eof,
            ..
        } => Ok(None),
        Response::Status { code, message } => Err(Error::status(code, message)),
        other => Err(Error::Protocol(format!(
            "expected DATA, got {:?}",
            other.packet_type()
        ))),
    }
}

pub(crate) fn expect_attrs(resp: Response) -> Result<FileAttributes> {
    match resp {
        Response::Attrs { attrs } => Ok(attrs),
        Response::Status { code, message } => Err(Error::status(code, message)),
        other => Err(Error::Protocol(format!(
            "expected ATTRS, got {:?}",
            other.packet_type()
        ))),
    }
}

pub(crate) fn expect_name(resp: Response) -> Result<Vec<NameEntry>> {
    match resp {
        Response::Name { entries } => Ok(entries),
        Response::Status { code, message } => Err(Error::status(code, message)),
        other => Err(Error::Protocol(format!(
            "expected NAME, got {:?}",
            other.packet_type()
        ))),
    }
}

pub(crate) fn expect_extended_reply(resp: Response) -> Result<Bytes> {
    match resp {
        Response::ExtendedReply { data } => Ok(data),
        Response::Status { code, message } => Err(Error::status(code, message)),
        other => Err(Error::Protocol(format!(
            "expected EXTENDED_REPLY, got {:?}",
            other.packet_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(SftpClientConfig::default().validate().is_ok());
        assert!(SftpClientConfig::new()
            .with_max_inflight(0)
            .validate()
            .is_err());
        assert!(SftpClientConfig::new()
            .with_pipeline_depth(128)
            .with_max_inflight(64)
            .validate()
            .is_err());
        assert!(SftpClientConfig::new()
            .with_chunk_size(1 << 20)
            .with_max_packet_size(64 * 1024)
            .validate()
            .is_err());
    }

    #[test]
    fn test_depths_follow_concurrency_switches() {
        let config = SftpClientConfig::new()
            .with_pipeline_depth(32)
            .with_concurrent_reads(false);
        assert_eq!(config.read_depth(), 1);
        assert_eq!(config.write_depth(), 32);
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote(".", "a"), "a");
        assert_eq!(join_remote("/", "a"), "/a");
        assert_eq!(join_remote("/x", "a"), "/x/a");
    }

    #[test]
    fn test_expect_helpers_map_status_failures() {
        let err = expect_attrs(Response::Status {
            code: StatusCode::NoSuchFile,
            message: String::new(),
        })
        .unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::NoSuchFile));

        assert!(expect_data(Response::Status {
            code: StatusCode::Eof,
            message: String::new(),
        })
        .unwrap()
        .is_none());
    }
}
