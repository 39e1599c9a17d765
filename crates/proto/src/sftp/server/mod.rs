//! SFTP server request pipeline.
//!
//! One session per byte stream. The session moves through four states:
//!
//! ```text
//! AWAITING-INIT --INIT/VERSION--> RUNNING --input EOF or fatal decode--> DRAINING --> CLOSED
//! ```
//!
//! In RUNNING, a reader loop decodes one packet at a time and hands each
//! request to a worker task drawn from a bounded pool; the reader pauses
//! when the pool is saturated, which is the server's backpressure. Workers
//! run their OS call through the platform shim, build a response, and
//! submit the encoded frame to a single writer task that owns the output
//! stream. Responses may therefore be written in any order, except that a
//! CLOSE response is held until every previously accepted request on that
//! handle has finished.

mod handles;
mod longname;

use self::handles::{HandleKind, HandleTable, OpGuard};
use super::alloc::{Page, PagePool};
use super::error::{Error, Result};
use super::extensions;
use super::packet::{self, NameEntry, PacketType, Request, Response, DEFAULT_MAX_PACKET_SIZE, SFTP_VERSION};
use super::types::{FileAttributes, OpenFlags, StatusCode};
use super::wire::{WireReader, WireWriter};
use bytes::Bytes;
use sealink_platform::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct SftpServerConfig {
    /// Reject every mutating request with PERMISSION_DENIED.
    pub read_only: bool,
    /// Largest frame accepted or produced.
    pub max_packet_size: usize,
    /// Maximum concurrently executing request workers.
    pub worker_limit: usize,
    /// Maximum entries returned per READDIR.
    pub readdir_batch: usize,
    /// Depth of the response queue feeding the writer task.
    pub response_queue: usize,
    /// Serve inbound frames out of a fixed-size page pool.
    pub use_allocator: bool,
}

impl Default for SftpServerConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            worker_limit: 64,
            readdir_batch: 128,
            response_queue: 64,
            use_allocator: false,
        }
    }
}

impl SftpServerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects all mutating requests.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the packet size cap.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Sets the worker pool size.
    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit;
        self
    }

    /// Sets the READDIR batch size.
    pub fn with_readdir_batch(mut self, batch: usize) -> Self {
        self.readdir_batch = batch;
        self
    }

    /// Enables the inbound page allocator.
    pub fn with_allocator(mut self, enabled: bool) -> Self {
        self.use_allocator = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size < 4096 {
            return Err(Error::Config(
                "max_packet_size must be at least 4096".to_string(),
            ));
        }
        if self.worker_limit == 0 {
            return Err(Error::Config("worker_limit must be nonzero".to_string()));
        }
        if self.readdir_batch == 0 {
            return Err(Error::Config("readdir_batch must be nonzero".to_string()));
        }
        if self.response_queue == 0 {
            return Err(Error::Config("response_queue must be nonzero".to_string()));
        }
        Ok(())
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingInit,
    Running,
    Draining,
    Closed,
}

/// SFTP server.
///
/// The server is configuration only; [`SftpServer::serve`] runs one session
/// over a pre-authenticated byte stream pair and owns nothing beyond it, so
/// a host can run many sessions from one `SftpServer`.
#[derive(Debug, Clone)]
pub struct SftpServer {
    config: SftpServerConfig,
}

struct SessionCtx {
    config: SftpServerConfig,
    handles: Arc<HandleTable>,
    resp_tx: mpsc::Sender<Bytes>,
    max_data_len: u32,
}

/// Inbound frame storage: an allocator page or a plain heap buffer.
///
/// The page travels with the request to its worker and returns to the pool
/// when the response has been built, whether the request succeeded or not.
enum FrameBuf {
    Page { page: Page, len: usize, tag: u8 },
    Heap { body: Bytes, tag: u8 },
}

impl FrameBuf {
    fn tag(&self) -> u8 {
        match self {
            FrameBuf::Page { tag, .. } | FrameBuf::Heap { tag, .. } => *tag,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            FrameBuf::Page { page, len, .. } => &page.as_slice()[..*len],
            FrameBuf::Heap { body, .. } => body,
        }
    }

    fn release(self, pool: &Option<PagePool>) {
        if let (FrameBuf::Page { page, .. }, Some(pool)) = (self, pool) {
            pool.release(page);
        }
    }
}

impl SftpServer {
    /// Creates a server with the given configuration.
    pub fn new(config: SftpServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Creates a server with default configuration.
    pub fn with_defaults() -> Self {
        Self {
            config: SftpServerConfig::default(),
        }
    }

    /// The server configuration.
    pub fn config(&self) -> &SftpServerConfig {
        &self.config
    }

    /// Runs one session over a byte stream pair until the peer closes it or
    /// a fatal protocol error occurs.
    ///
    /// On return every handle is closed, every pooled page freed, and the
    /// output stream shut down.
    pub async fn serve<R, W>(&self, mut input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let config = self.config.clone();
        let mut state = SessionState::AwaitingInit;
        debug!(?state, "session started");

        // AWAITING-INIT: anything but INIT terminates the session.
        let version = match packet::read_frame(&mut input, config.max_packet_size).await? {
            None => {
                return Err(Error::Protocol(
                    "stream closed before INIT".to_string(),
                ))
            }
            Some((ptype, body)) => {
                if PacketType::from_u8(ptype) != Some(PacketType::Init) {
                    return Err(Error::Protocol(format!(
                        "expected INIT, got packet type {}",
                        ptype
                    )));
                }
                let init = packet::decode_version_body(&body)?;
                SFTP_VERSION.min(init.version)
            }
        };

        // Single writer task owns the output stream; workers feed it
        // encoded frames through a bounded queue.
        let (resp_tx, mut resp_rx) = mpsc::channel::<Bytes>(config.response_queue);
        let writer = tokio::spawn(async move {
            let mut output = output;
            while let Some(frame) = resp_rx.recv().await {
                output.write_all(&frame).await?;
                output.flush().await?;
            }
            output.shutdown().await.ok();
            Ok::<(), std::io::Error>(())
        });

        let advertised = extensions::server_extensions();
        resp_tx
            .send(packet::encode_version(version, &advertised))
            .await
            .map_err(|_| Error::ConnectionLost)?;

        state = SessionState::Running;
        info!(version, ?state, "SFTP session negotiated");

        let handles = Arc::new(HandleTable::new());
        let pool = config
            .use_allocator
            .then(|| PagePool::new(config.max_packet_size));
        let worker_slots = Arc::new(Semaphore::new(config.worker_limit));
        let mut workers: JoinSet<()> = JoinSet::new();
        let ctx = Arc::new(SessionCtx {
            max_data_len: (config.max_packet_size - 1024) as u32,
            config: config.clone(),
            handles: Arc::clone(&handles),
            resp_tx: resp_tx.clone(),
        });

        let mut result = Ok(());
        loop {
            // Reap finished workers so the set stays small.
            while workers.try_join_next().is_some() {}

            let frame = match self.read_inbound(&mut input, &pool).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break, // clean EOF from the peer
                Err(e) => {
                    warn!(error = %e, "fatal inbound error, draining session");
                    result = Err(e);
                    break;
                }
            };

            let mut reader = WireReader::new(frame.bytes());
            let id = match reader.read_u32("request id") {
                Ok(id) => id,
                Err(e) => {
                    frame.release(&pool);
                    result = Err(e);
                    break;
                }
            };

            let request = match PacketType::from_u8(frame.tag()) {
                Some(pt) if pt.is_request() => match Request::decode(pt, reader) {
                    Ok(req) => req,
                    Err(e) => {
                        frame.release(&pool);
                        result = Err(e);
                        break;
                    }
                },
                _ => {
                    // Unknown or non-request packet type: answer
                    // op-unsupported and keep the session alive.
                    frame.release(&pool);
                    let status = Response::Status {
                        code: StatusCode::OpUnsupported,
                        message: StatusCode::OpUnsupported.message().to_string(),
                    };
                    if resp_tx.send(status.encode(id)).await.is_err() {
                        result = Err(Error::ConnectionLost);
                        break;
                    }
                    continue;
                }
            };

            // Claim the handle's in-flight slot before the worker exists,
            // so a CLOSE decoded after this request always waits for it no
            // matter how the scheduler orders the worker tasks.
            let claim = claim_handle(&handles, &request);

            // Backpressure: wait for a worker slot before reading further.
            let permit = match Arc::clone(&worker_slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let ctx = Arc::clone(&ctx);
            let pool = pool.clone();
            workers.spawn(async move {
                let response = dispatch(&ctx, request, claim)
                    .await
                    .unwrap_or_else(status_from_error);
                let _ = ctx.resp_tx.send(response.encode(id)).await;
                frame.release(&pool);
                drop(permit);
            });
        }

        state = SessionState::Draining;
        debug!(?state, "draining outstanding workers");

        while workers.join_next().await.is_some() {}
        drop(ctx);
        drop(resp_tx);
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if result.is_ok() {
                    result = Err(Error::Io(e));
                }
            }
            Err(e) => {
                if result.is_ok() {
                    result = Err(Error::Protocol(format!("writer task failed: {}", e)));
                }
            }
        }

        handles.clear();
        if let Some(pool) = &pool {
            pool.drain();
        }

        state = SessionState::Closed;
        info!(?state, "session finished");
        result
    }

    /// Reads one frame, out of the page pool when enabled.
    async fn read_inbound<R>(
        &self,
        input: &mut R,
        pool: &Option<PagePool>,
    ) -> Result<Option<FrameBuf>>
    where
        R: AsyncRead + Unpin + Send,
    {
        match pool {
            Some(pool) => {
                let mut page = pool.acquire();
                match packet::read_frame_into(input, page.as_mut_slice()).await {
                    Ok(Some((tag, len))) => Ok(Some(FrameBuf::Page { page, len, tag })),
                    Ok(None) => {
                        pool.release(page);
                        Ok(None)
                    }
                    Err(e) => {
                        pool.release(page);
                        Err(e)
                    }
                }
            }
            None => {
                match packet::read_frame(input, self.config.max_packet_size).await? {
                    Some((tag, body)) => Ok(Some(FrameBuf::Heap { body, tag })),
                    None => Ok(None),
                }
            }
        }
    }
}

fn status_from_error(err: Error) -> Response {
    match err {
        Error::Io(e) => Response::Status {
            code: StatusCode::from_io_error(&e),
            message: e.to_string(),
        },
        Error::Status { code, message } => Response::Status { code, message },
        other => Response::Status {
            code: StatusCode::Failure,
            message: other.to_string(),
        },
    }
}

fn invalid_handle() -> Error {
    Error::status(StatusCode::Failure, "invalid handle")
}

/// Outcome of registering a request against the handle table at accept
/// time, in the reader loop.
///
/// A request counts as in-flight from the moment it is accepted, not from
/// whenever its worker first runs; claiming the slot here is what keeps a
/// CLOSE decoded afterwards from overtaking it.
enum HandleClaim {
    /// The request references no handle (CLOSE claims nothing either; the
    /// close path does its own waiting).
    NotNeeded,
    /// The handle was live; the guard holds its in-flight slot until the
    /// worker finishes.
    Held(OpGuard),
    /// The handle is unknown or already closing.
    Stale,
}

fn claim_handle(handles: &Arc<HandleTable>, request: &Request) -> HandleClaim {
    let handle = match request {
        Request::Read { handle, .. }
        | Request::Write { handle, .. }
        | Request::Fstat { handle }
        | Request::FSetStat { handle, .. }
        | Request::ReadDir { handle } => handle.clone(),
        Request::Extended { name, data } if name.as_str() == extensions::FSYNC => {
            let mut r = WireReader::new(data);
            match r.read_bytes("fsync handle") {
                Ok(handle) => handle,
                // Malformed payload; the worker reports it when it parses.
                Err(_) => return HandleClaim::NotNeeded,
            }
        }
        _ => return HandleClaim::NotNeeded,
    };
    let Ok(handle) = std::str::from_utf8(&handle) else {
        return HandleClaim::Stale;
    };
    match handles.begin_op(handle) {
        Some(guard) => HandleClaim::Held(guard),
        None => HandleClaim::Stale,
    }
}

fn claimed(claim: HandleClaim) -> Result<OpGuard> {
    match claim {
        HandleClaim::Held(guard) => Ok(guard),
        HandleClaim::NotNeeded | HandleClaim::Stale => Err(invalid_handle()),
    }
}

fn read_only_denied() -> Error {
    Error::status(
        StatusCode::PermissionDenied,
        "server is in read-only mode",
    )
}

fn handle_str(handle: &Bytes) -> Result<&str> {
    std::str::from_utf8(handle).map_err(|_| invalid_handle())
}

fn file_of(guard: &OpGuard) -> Result<(Arc<std::fs::File>, bool)> {
    match guard.kind() {
        HandleKind::File { file, append } => Ok((Arc::clone(file), *append)),
        HandleKind::Dir(_) => Err(Error::status(StatusCode::Failure, "not a file handle")),
    }
}

/// Lexically normalizes a path: absolute against the process directory,
/// `.` and `..` folded. Used when canonicalization fails because the path
/// does not exist yet, matching the version-3 convention of resolving only
/// what is resolvable.
fn clean_path(path: &str) -> PathBuf {
    let raw = if path.is_empty() { "." } else { path };
    let joined = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(raw)
    };

    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

/// Decides which SYMLINK argument is the link target.
///
/// Version 3 peers disagree on the order; OpenSSH sends (target, link),
/// the draft says (link, target). When exactly one argument already
/// exists, it is taken as the target; otherwise the OpenSSH convention
/// wins.
async fn resolve_symlink_order(first: &str, second: &str) -> (PathBuf, PathBuf) {
    let first_exists = fs::lstat(Path::new(first)).await.is_ok();
    let second_exists = fs::lstat(Path::new(second)).await.is_ok();
    if !first_exists && second_exists {
        (PathBuf::from(second), PathBuf::from(first))
    } else {
        (PathBuf::from(first), PathBuf::from(second))
    }
}

async fn apply_setstat_path(path: &Path, attrs: &FileAttributes) -> Result<()> {
    if let Some(size) = attrs.size {
        fs::truncate(path, size).await?;
    }
    if let Some(mode) = attrs.permissions {
        fs::chmod(path, mode).await?;
    }
    if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
        fs::chown(path, uid, gid).await?;
    }
    if let (Some(atime), Some(mtime)) = (attrs.atime, attrs.mtime) {
        fs::utimes(path, atime, mtime).await?;
    }
    Ok(())
}

async fn dispatch(ctx: &SessionCtx, request: Request, claim: HandleClaim) -> Result<Response> {
    let read_only = ctx.config.read_only;
    match request {
        Request::Open { path, flags, attrs } => {
            if read_only && flags.is_mutating() {
                return Err(read_only_denied());
            }
            if !flags.contains(OpenFlags::READ)
                && !flags.contains(OpenFlags::WRITE)
                && !flags.contains(OpenFlags::APPEND)
            {
                return Err(Error::status(StatusCode::Failure, "invalid open flags"));
            }
            let how = flags.to_open_mode(attrs.permissions.map(|m| m & 0o7777));
            let file = fs::open(Path::new(&path), how).await?;
            debug!(path = %path, "opened file");
            let handle = ctx
                .handles
                .insert_file(PathBuf::from(path), file, how.append);
            Ok(Response::Handle {
                handle: Bytes::from(handle),
            })
        }
        Request::Close { handle } => {
            let hs = handle_str(&handle)?;
            match ctx.handles.close(hs).await {
                Some((kind, path)) => {
                    debug!(path = %path.display(), "closed handle");
                    drop(kind);
                    Ok(Response::Status {
                        code: StatusCode::Ok,
                        message: String::new(),
                    })
                }
                None => Err(invalid_handle()),
            }
        }
        Request::Read { offset, len, .. } => {
            let guard = claimed(claim)?;
            let (file, _) = file_of(&guard)?;
            let len = len.min(ctx.max_data_len) as usize;
            let data = fs::read_at(&file, offset, len).await?;
            if data.is_empty() && len > 0 {
                return Err(Error::status(StatusCode::Eof, ""));
            }
            Ok(Response::Data { data: data.into() })
        }
        Request::Write { offset, data, .. } => {
            if read_only {
                return Err(read_only_denied());
            }
            let guard = claimed(claim)?;
            let (file, append) = file_of(&guard)?;
            if append {
                fs::append(&file, data.to_vec()).await?;
            } else {
                fs::write_at(&file, offset, data.to_vec()).await?;
            }
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        Request::Lstat { path } => {
            let st = fs::lstat(Path::new(&path)).await?;
            Ok(Response::Attrs {
                attrs: FileAttributes::from_stat(&st),
            })
        }
        Request::Stat { path } => {
            let st = fs::stat(Path::new(&path)).await?;
            Ok(Response::Attrs {
                attrs: FileAttributes::from_stat(&st),
            })
        }
        Request::Fstat { .. } => {
            let guard = claimed(claim)?;
            let (file, _) = file_of(&guard)?;
            let st = fs::fstat(&file).await?;
            Ok(Response::Attrs {
                attrs: FileAttributes::from_stat(&st),
            })
        }
        Request::SetStat { path, attrs } => {
            if read_only {
                return Err(read_only_denied());
            }
            apply_setstat_path(Path::new(&path), &attrs).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        Request::FSetStat { attrs, .. } => {
            if read_only {
                return Err(read_only_denied());
            }
            let guard = claimed(claim)?;
            let (file, _) = file_of(&guard)?;
            if let Some(size) = attrs.size {
                fs::set_len(&file, size).await?;
            }
            if let Some(mode) = attrs.permissions {
                fs::fchmod(&file, mode).await?;
            }
            if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
                fs::chown(guard.path(), uid, gid).await?;
            }
            if let (Some(atime), Some(mtime)) = (attrs.atime, attrs.mtime) {
                fs::futimes(&file, atime, mtime).await?;
            }
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        Request::OpenDir { path } => {
            let st = fs::stat(Path::new(&path)).await?;
            if !st.is_dir() {
                return Err(Error::status(StatusCode::Failure, "not a directory"));
            }
            let iter = fs::open_dir(Path::new(&path)).await?;
            let handle = ctx.handles.insert_dir(PathBuf::from(path), iter);
            Ok(Response::Handle {
                handle: Bytes::from(handle),
            })
        }
        Request::ReadDir { .. } => {
            let guard = claimed(claim)?;
            let dir = match guard.kind() {
                HandleKind::Dir(dir) => Arc::clone(dir),
                HandleKind::File { .. } => {
                    return Err(Error::status(StatusCode::Failure, "not a directory handle"))
                }
            };

            // Per-handle lock serializes concurrent READDIRs without
            // touching the table lock across I/O.
            let mut state = dir.lock().await;
            if state.exhausted {
                return Err(Error::status(StatusCode::Eof, ""));
            }
            let iter = match state.iter.take() {
                Some(iter) => iter,
                None => return Err(Error::status(StatusCode::Eof, "")),
            };
            let (iter, entries, exhausted) =
                match fs::read_dir_batch(iter, ctx.config.readdir_batch).await {
                    Ok(out) => out,
                    Err(e) => {
                        state.exhausted = true;
                        return Err(Error::Io(e));
                    }
                };
            if exhausted {
                state.exhausted = true;
            } else {
                state.iter = Some(iter);
            }
            drop(state);

            if entries.is_empty() {
                return Err(Error::status(StatusCode::Eof, ""));
            }
            let entries = entries
                .into_iter()
                .map(|e| NameEntry {
                    longname: longname::format_longname(&e.name, &e.stat),
                    attrs: FileAttributes::from_stat(&e.stat),
                    filename: e.name,
                })
                .collect();
            Ok(Response::Name { entries })
        }
        Request::Remove { path } => {
            if read_only {
                return Err(read_only_denied());
            }
            fs::remove_file(Path::new(&path)).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        Request::Mkdir { path, attrs } => {
            if read_only {
                return Err(read_only_denied());
            }
            fs::create_dir(Path::new(&path), attrs.permissions.map(|m| m & 0o7777)).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        Request::Rmdir { path } => {
            if read_only {
                return Err(read_only_denied());
            }
            fs::remove_dir(Path::new(&path)).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        Request::RealPath { path } => {
            let resolved = match fs::canonicalize(Path::new(&path)).await {
                Ok(p) => p,
                Err(_) => clean_path(&path),
            };
            let attrs = fs::stat(&resolved)
                .await
                .map(|st| FileAttributes::from_stat(&st))
                .unwrap_or_default();
            let name = resolved.to_string_lossy().into_owned();
            Ok(Response::Name {
                entries: vec![NameEntry {
                    longname: name.clone(),
                    filename: name,
                    attrs,
                }],
            })
        }
        Request::Rename { oldpath, newpath } => {
            if read_only {
                return Err(read_only_denied());
            }
            // Version-3 RENAME must not replace an existing target; the
            // posix-rename extension carries rename(2) semantics instead.
            if fs::lstat(Path::new(&newpath)).await.is_ok() {
                return Err(Error::status(
                    StatusCode::Failure,
                    "target already exists",
                ));
            }
            fs::rename(Path::new(&oldpath), Path::new(&newpath)).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        Request::ReadLink { path } => {
            let target = fs::readlink(Path::new(&path)).await?;
            let name = target.to_string_lossy().into_owned();
            Ok(Response::Name {
                entries: vec![NameEntry {
                    longname: name.clone(),
                    filename: name,
                    attrs: FileAttributes::new(),
                }],
            })
        }
        Request::Symlink { first, second } => {
            if read_only {
                return Err(read_only_denied());
            }
            let (target, link) = resolve_symlink_order(&first, &second).await;
            fs::symlink(&target, &link).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        Request::Extended { name, data } => dispatch_extended(ctx, &name, &data, claim).await,
    }
}

async fn dispatch_extended(
    ctx: &SessionCtx,
    name: &str,
    data: &Bytes,
    claim: HandleClaim,
) -> Result<Response> {
    let read_only = ctx.config.read_only;
    match name {
        extensions::POSIX_RENAME => {
            if read_only {
                return Err(read_only_denied());
            }
            let mut r = WireReader::new(data);
            let oldpath = r.read_string("posix-rename oldpath")?;
            let newpath = r.read_string("posix-rename newpath")?;
            r.finish("posix-rename body")?;
            fs::rename(Path::new(&oldpath), Path::new(&newpath)).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        extensions::HARDLINK => {
            if read_only {
                return Err(read_only_denied());
            }
            let mut r = WireReader::new(data);
            let oldpath = r.read_string("hardlink oldpath")?;
            let newpath = r.read_string("hardlink newpath")?;
            r.finish("hardlink body")?;
            fs::hardlink(Path::new(&oldpath), Path::new(&newpath)).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        extensions::FSYNC => {
            if read_only {
                return Err(read_only_denied());
            }
            let mut r = WireReader::new(data);
            let _handle = r.read_bytes("fsync handle")?;
            r.finish("fsync body")?;
            let guard = claimed(claim)?;
            let (file, _) = file_of(&guard)?;
            fs::sync_all(&file).await?;
            Ok(Response::Status {
                code: StatusCode::Ok,
                message: String::new(),
            })
        }
        extensions::STATVFS => {
            let mut r = WireReader::new(data);
            let path = r.read_string("statvfs path")?;
            r.finish("statvfs body")?;
            let vfs = fs::statvfs(Path::new(&path)).await?;
            let mut w = WireWriter::with_capacity(11 * 8);
            w.put_u64(vfs.bsize)
                .put_u64(vfs.frsize)
                .put_u64(vfs.blocks)
                .put_u64(vfs.bfree)
                .put_u64(vfs.bavail)
                .put_u64(vfs.files)
                .put_u64(vfs.ffree)
                .put_u64(vfs.favail)
                .put_u64(vfs.fsid)
                .put_u64(vfs.flags)
                .put_u64(vfs.namemax);
            Ok(Response::ExtendedReply {
                data: w.into_body(),
            })
        }
        extensions::LIMITS => {
            let mut w = WireWriter::with_capacity(4 * 8);
            w.put_u64(ctx.config.max_packet_size as u64)
                .put_u64(ctx.max_data_len as u64)
                .put_u64(ctx.max_data_len as u64)
                .put_u64(0); // open handles: no fixed cap
            Ok(Response::ExtendedReply {
                data: w.into_body(),
            })
        }
        other => {
            debug!(extension = other, "unsupported extension requested");
            Err(Error::status(
                StatusCode::OpUnsupported,
                format!("unsupported extension {}", other),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_and_validation() {
        let config = SftpServerConfig::new()
            .with_read_only(true)
            .with_worker_limit(8)
            .with_readdir_batch(32)
            .with_allocator(true);
        assert!(config.read_only);
        assert_eq!(config.worker_limit, 8);
        assert!(config.validate().is_ok());

        let bad = SftpServerConfig::new().with_worker_limit(0);
        assert!(bad.validate().is_err());
        let bad = SftpServerConfig::new().with_max_packet_size(16);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_clean_path_folds_dots() {
        assert_eq!(clean_path("/a/b/../c/./d"), PathBuf::from("/a/c/d"));
        assert_eq!(clean_path("/.."), PathBuf::from("/"));
        assert!(clean_path("relative/x").is_absolute());
        assert!(clean_path("").is_absolute());
    }

    #[test]
    fn test_status_from_error_maps_io_kinds() {
        let resp = status_from_error(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        )));
        match resp {
            Response::Status { code, .. } => assert_eq!(code, StatusCode::NoSuchFile),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_claim_registers_before_worker_spawn() {
        let dir = std::env::temp_dir().join(format!(
            "sealink-claim-{}-{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("f");
        let file = std::fs::File::create(&path).unwrap();

        let handles = Arc::new(HandleTable::new());
        let handle = handles.insert_file(path.clone(), file, false);
        let read = Request::Read {
            handle: Bytes::from(handle.clone()),
            offset: 0,
            len: 16,
        };

        // Accepting a READ claims its in-flight slot immediately, so a
        // CLOSE racing in afterwards cannot retire the handle under it.
        let claim = claim_handle(&handles, &read);
        assert!(matches!(claim, HandleClaim::Held(_)));
        let closer = {
            let handles = Arc::clone(&handles);
            let handle = handle.clone();
            tokio::spawn(async move { handles.close(&handle).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!closer.is_finished());
        drop(claim);
        assert!(closer.await.unwrap().is_some());

        // After the close, the same request is stale at accept time.
        assert!(matches!(
            claim_handle(&handles, &read),
            HandleClaim::Stale
        ));
        // Requests without handles claim nothing.
        assert!(matches!(
            claim_handle(
                &handles,
                &Request::Remove {
                    path: "/x".to_string()
                }
            ),
            HandleClaim::NotNeeded
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_symlink_order_heuristic() {
        let dir = std::env::temp_dir().join(format!(
            "sealink-symlink-order-{}-{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("exists");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.join("missing");

        // OpenSSH order: (target, link).
        let (t, l) = resolve_symlink_order(target.to_str().unwrap(), link.to_str().unwrap()).await;
        assert_eq!(t, target);
        assert_eq!(l, link);

        // Draft order (link, target) is detected and swapped.
        let (t, l) = resolve_symlink_order(link.to_str().unwrap(), target.to_str().unwrap()).await;
        assert_eq!(t, target);
        assert_eq!(l, link);

        std::fs::remove_dir_all(&dir).ok();
    }
}
