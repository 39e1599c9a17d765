//! Remote file objects and pipelined sequential streams.
//!
//! [`RemoteFile`] exposes random access (`read_at`, `write_at`) plus
//! sequential [`FileReader`]/[`FileWriter`] streams that keep a window of
//! outstanding chunk requests on the wire. Responses may arrive in any
//! order; correlation happens per request, and the streams pop completions
//! in issue order so reassembly by offset falls out of the FIFO.

use super::super::error::{Error, Result};
use super::super::extensions::{self, ExtensionSet};
use super::super::packet::Request;
use super::super::types::{FileAttributes, StatusCode};
use super::super::wire::WireWriter;
use super::dispatcher::{Dispatcher, ResponseWaiter};
use super::{expect_attrs, expect_data, expect_status, SftpClientConfig};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// An open remote file.
///
/// The handle stays valid until [`RemoteFile::close`] or session teardown.
/// Dropping without closing leaks the server-side handle until the session
/// ends, so a best-effort CLOSE is fired from `Drop`.
pub struct RemoteFile {
    dispatcher: Arc<Dispatcher>,
    config: SftpClientConfig,
    extensions: ExtensionSet,
    handle: Bytes,
    path: String,
    closed: bool,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("handle", &self.handle)
            .field("path", &self.path)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RemoteFile {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        config: SftpClientConfig,
        extensions: ExtensionSet,
        handle: Bytes,
        path: String,
    ) -> Self {
        Self {
            dispatcher,
            config,
            extensions,
            handle,
            path,
            closed: false,
        }
    }

    /// The path this file was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reads up to `len` bytes at `offset`.
    ///
    /// Returns fewer bytes only at end of file. Requests larger than one
    /// chunk are pipelined.
    pub async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let chunk = self.config.chunk_size;
        let depth = self.config.read_depth();
        let end = offset + len as u64;

        let mut out = BytesMut::with_capacity(len.min(1 << 20));
        let mut pending: VecDeque<(usize, ResponseWaiter)> = VecDeque::new();
        let mut issue = offset;
        let mut eof = false;

        loop {
            while !eof && issue < end && pending.len() < depth {
                let want = chunk.min((end - issue) as usize);
                let waiter = self
                    .dispatcher
                    .send(Request::Read {
                        handle: self.handle.clone(),
                        offset: issue,
                        len: want as u32,
                    })
                    .await?;
                pending.push_back((want, waiter));
                issue += want as u64;
            }

            let Some((want, waiter)) = pending.pop_front() else {
                break;
            };
            match expect_data(waiter.wait().await?)? {
                Some(data) => {
                    let short = data.len() < want;
                    out.extend_from_slice(&data);
                    if short {
                        eof = true;
                        // Later chunks lie past end of file; their replies
                        // are consumed and discarded by the dispatcher.
                        pending.clear();
                    }
                }
                None => {
                    eof = true;
                    pending.clear();
                }
            }
        }

        Ok(out.freeze())
    }

    /// Writes all of `data` at `offset`, pipelining chunks.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let chunk = self.config.chunk_size;
        let depth = self.config.write_depth();
        let mut pending: VecDeque<ResponseWaiter> = VecDeque::new();

        for (i, piece) in data.chunks(chunk).enumerate() {
            while pending.len() >= depth {
                let waiter = pending.pop_front().expect("nonempty pending queue");
                expect_status(waiter.wait().await?)?;
            }
            let waiter = self
                .dispatcher
                .send(Request::Write {
                    handle: self.handle.clone(),
                    offset: offset + (i * chunk) as u64,
                    data: Bytes::copy_from_slice(piece),
                })
                .await?;
            pending.push_back(waiter);
        }

        for waiter in pending {
            expect_status(waiter.wait().await?)?;
        }
        Ok(())
    }

    /// Stats the open handle.
    pub async fn stat(&self) -> Result<FileAttributes> {
        let resp = self
            .dispatcher
            .call(Request::Fstat {
                handle: self.handle.clone(),
            })
            .await?;
        expect_attrs(resp)
    }

    /// Applies attributes to the open handle.
    pub async fn set_stat(&self, attrs: FileAttributes) -> Result<()> {
        let resp = self
            .dispatcher
            .call(Request::FSetStat {
                handle: self.handle.clone(),
                attrs,
            })
            .await?;
        expect_status(resp)
    }

    /// Flushes the handle to stable storage via `fsync@openssh.com`.
    pub async fn fsync(&self) -> Result<()> {
        if !self.extensions.supports(extensions::FSYNC) {
            return Err(Error::status(
                StatusCode::OpUnsupported,
                "server does not support fsync@openssh.com",
            ));
        }
        let mut w = WireWriter::new();
        w.put_bytes(&self.handle);
        let resp = self
            .dispatcher
            .call(Request::Extended {
                name: extensions::FSYNC.to_string(),
                data: w.into_body(),
            })
            .await?;
        expect_status(resp)
    }

    /// A sequential reader starting at `offset`.
    pub fn reader(&self, offset: u64) -> FileReader<'_> {
        FileReader {
            file: self,
            issue_offset: offset,
            consumed: offset,
            pending: VecDeque::new(),
            buffer: Bytes::new(),
            eof: false,
            size_hint: None,
            checked_size: false,
        }
    }

    /// A sequential writer starting at `offset`.
    pub fn writer(&self, offset: u64) -> FileWriter<'_> {
        FileWriter {
            file: self,
            offset,
            pending: VecDeque::new(),
        }
    }

    /// Closes the handle. The server holds this response until every
    /// previously accepted request on the handle has completed.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        let resp = self
            .dispatcher
            .call(Request::Close {
                handle: self.handle.clone(),
            })
            .await?;
        expect_status(resp)
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if self.closed || self.dispatcher.is_closed() {
            return;
        }
        debug!(path = %self.path, "closing leaked file handle");
        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    let _ = dispatcher.call(Request::Close { handle }).await;
                });
            }
            Err(_) => warn!(path = %self.path, "dropped file handle outside a runtime"),
        }
    }
}

/// Sequential read stream with read-ahead.
///
/// Keeps up to the configured pipeline depth of READ requests outstanding
/// over contiguous offset windows. End of file is detected from a short
/// chunk or an EOF status.
pub struct FileReader<'a> {
    file: &'a RemoteFile,
    issue_offset: u64,
    consumed: u64,
    pending: VecDeque<(u64, usize, ResponseWaiter)>,
    buffer: Bytes,
    eof: bool,
    size_hint: Option<u64>,
    checked_size: bool,
}

impl FileReader<'_> {
    /// Logical position of the next unread byte.
    pub fn position(&self) -> u64 {
        self.consumed
    }

    async fn top_up(&mut self) -> Result<()> {
        if self.eof {
            return Ok(());
        }
        if self.file.config.use_fstat && !self.checked_size {
            self.checked_size = true;
            if let Ok(attrs) = self.file.stat().await {
                self.size_hint = attrs.size;
            }
        }
        let chunk = self.file.config.chunk_size;
        let depth = self.file.config.read_depth();
        while self.pending.len() < depth {
            if let Some(limit) = self.size_hint {
                if self.issue_offset >= limit {
                    break;
                }
            }
            let waiter = self
                .file
                .dispatcher
                .send(Request::Read {
                    handle: self.file.handle.clone(),
                    offset: self.issue_offset,
                    len: chunk as u32,
                })
                .await?;
            self.pending.push_back((self.issue_offset, chunk, waiter));
            self.issue_offset += chunk as u64;
        }
        Ok(())
    }

    /// Refills the internal buffer. False means end of file.
    async fn fill(&mut self) -> Result<bool> {
        while self.buffer.is_empty() {
            if self.eof {
                return Ok(false);
            }
            self.top_up().await?;
            let Some((_, want, waiter)) = self.pending.pop_front() else {
                self.eof = true;
                return Ok(false);
            };
            match expect_data(waiter.wait().await?)? {
                Some(data) => {
                    if data.len() < want {
                        self.eof = true;
                        self.pending.clear();
                    }
                    self.buffer = data;
                }
                None => {
                    self.eof = true;
                    self.pending.clear();
                }
            }
        }
        Ok(true)
    }

    /// Reads into `out`, returning 0 exactly at end of file.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if !self.fill().await? {
            return Ok(0);
        }
        let n = out.len().min(self.buffer.len());
        out[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer = self.buffer.slice(n..);
        self.consumed += n as u64;
        Ok(n)
    }

    /// Returns the next buffered chunk, or `None` at end of file.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.fill().await? {
            return Ok(None);
        }
        let chunk = std::mem::take(&mut self.buffer);
        self.consumed += chunk.len() as u64;
        Ok(Some(chunk))
    }

    /// Reads everything from the current position to end of file.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Sequential write stream with bounded outstanding WRITEs.
pub struct FileWriter<'a> {
    file: &'a RemoteFile,
    offset: u64,
    pending: VecDeque<ResponseWaiter>,
}

impl FileWriter<'_> {
    /// Offset the next write lands at.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Appends `data` to the stream, pipelining chunk WRITEs.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let chunk = self.file.config.chunk_size;
        let depth = self.file.config.write_depth();
        for piece in data.chunks(chunk) {
            while self.pending.len() >= depth {
                let waiter = self.pending.pop_front().expect("nonempty pending queue");
                expect_status(waiter.wait().await?)?;
            }
            let waiter = self
                .file
                .dispatcher
                .send(Request::Write {
                    handle: self.file.handle.clone(),
                    offset: self.offset,
                    data: Bytes::copy_from_slice(piece),
                })
                .await?;
            self.pending.push_back(waiter);
            self.offset += piece.len() as u64;
        }
        Ok(())
    }

    /// Waits for every outstanding WRITE to complete.
    pub async fn flush(&mut self) -> Result<()> {
        while let Some(waiter) = self.pending.pop_front() {
            expect_status(waiter.wait().await?)?;
        }
        Ok(())
    }
}
