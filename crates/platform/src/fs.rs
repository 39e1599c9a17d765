//! Local filesystem shim.
//!
//! Every local file operation the Sealink core performs goes through this
//! module. Positional reads and writes never move a shared file cursor, so
//! many operations against the same open file can run concurrently. Blocking
//! syscalls are pushed onto the blocking pool via [`tokio::task::spawn_blocking`].
//!
//! This module is the single place in the workspace that branches on the host
//! platform. Operations a platform cannot express (`chown`, `utimes`,
//! `statvfs` and symlinks outside Unix) fail with [`std::io::ErrorKind::Unsupported`]
//! so callers can degrade per-operation instead of per-platform.

use std::fs::{File, Metadata, ReadDir};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

/// File-type mask within a POSIX mode word.
pub const S_IFMT: u32 = 0o170000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;

/// Snapshot of a file's metadata in protocol-friendly units.
///
/// Timestamps are clamped to `u32` seconds, matching what SFTP v3 can carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
    /// POSIX mode bits, including the file-type bits.
    pub mode: u32,
    /// Owner user id (0 where the platform has no notion of one).
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Access time, seconds since the epoch.
    pub atime: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: u32,
    /// Hard-link count.
    pub nlink: u64,
}

impl FileStat {
    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Returns true for symbolic links.
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Returns true for regular files.
    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Permission bits without the file-type bits.
    pub fn permissions(&self) -> u32 {
        self.mode & !S_IFMT
    }
}

/// How to open a file, independent of any protocol's flag encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenMode {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// All writes go to the end of the file.
    pub append: bool,
    /// Create the file if it does not exist.
    pub create: bool,
    /// Truncate to zero length on open.
    pub truncate: bool,
    /// Fail if the file already exists.
    pub create_new: bool,
    /// Permission bits to apply when creating.
    pub mode: Option<u32>,
}

impl OpenMode {
    /// True when the mode permits any mutation of the file.
    pub fn is_mutating(&self) -> bool {
        self.write || self.append || self.create || self.truncate || self.create_new
    }
}

fn join_err(e: task::JoinError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

fn clamp_ts(secs: i64) -> u32 {
    secs.clamp(0, u32::MAX as i64) as u32
}

/// Converts [`std::fs::Metadata`] into a [`FileStat`].
#[cfg(unix)]
pub fn stat_from_metadata(md: &Metadata) -> FileStat {
    use std::os::unix::fs::MetadataExt;

    FileStat {
        size: md.size(),
        mode: md.mode(),
        uid: md.uid(),
        gid: md.gid(),
        atime: clamp_ts(md.atime()),
        mtime: clamp_ts(md.mtime()),
        nlink: md.nlink(),
    }
}

/// Converts [`std::fs::Metadata`] into a [`FileStat`].
#[cfg(not(unix))]
pub fn stat_from_metadata(md: &Metadata) -> FileStat {
    use std::time::UNIX_EPOCH;

    let secs = |t: io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| clamp_ts(d.as_secs() as i64))
            .unwrap_or(0)
    };
    let type_bits = if md.is_dir() {
        S_IFDIR
    } else if md.file_type().is_symlink() {
        S_IFLNK
    } else {
        S_IFREG
    };
    let perm = if md.permissions().readonly() { 0o555 } else { 0o755 };

    FileStat {
        size: md.len(),
        mode: type_bits | perm,
        uid: 0,
        gid: 0,
        atime: secs(md.accessed()),
        mtime: secs(md.modified()),
        nlink: 1,
    }
}

/// Opens a file according to `how`.
pub async fn open(path: &Path, how: OpenMode) -> io::Result<File> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || open_blocking(&path, &how))
        .await
        .map_err(join_err)?
}

#[cfg(unix)]
fn open_blocking(path: &Path, how: &OpenMode) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut opts = std::fs::OpenOptions::new();
    opts.read(how.read)
        .write(how.write)
        .append(how.append)
        .create(how.create)
        .truncate(how.truncate)
        .create_new(how.create_new);
    if let Some(mode) = how.mode {
        opts.mode(mode & 0o7777);
    }
    opts.open(path)
}

#[cfg(not(unix))]
fn open_blocking(path: &Path, how: &OpenMode) -> io::Result<File> {
    let mut opts = std::fs::OpenOptions::new();
    opts.read(how.read)
        .write(how.write)
        .append(how.append)
        .create(how.create)
        .truncate(how.truncate)
        .create_new(how.create_new);
    opts.open(path)
}

#[cfg(unix)]
fn read_at_blocking(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at_blocking(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(unix)]
fn write_at_blocking(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn write_at_blocking(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Reads up to `len` bytes at `offset`, retrying on partial reads.
///
/// Returns fewer than `len` bytes only at end of file.
pub async fn read_at(file: &Arc<File>, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let file = Arc::clone(file);
    task::spawn_blocking(move || {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match read_at_blocking(&file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    })
    .await
    .map_err(join_err)?
}

/// Writes the whole buffer at `offset`, retrying on partial writes.
pub async fn write_at(file: &Arc<File>, offset: u64, data: Vec<u8>) -> io::Result<()> {
    let file = Arc::clone(file);
    task::spawn_blocking(move || {
        let mut written = 0;
        while written < data.len() {
            match write_at_blocking(&file, &data[written..], offset + written as u64) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned zero bytes",
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    })
    .await
    .map_err(join_err)?
}

/// Appends the whole buffer to a file opened in append mode.
///
/// The kernel picks the offset; the one supplied by the peer is ignored, which
/// is what append semantics demand.
pub async fn append(file: &Arc<File>, data: Vec<u8>) -> io::Result<()> {
    use std::io::Write;

    let file = Arc::clone(file);
    task::spawn_blocking(move || (&*file).write_all(&data))
        .await
        .map_err(join_err)?
}

/// Truncates or extends an open file.
pub async fn set_len(file: &Arc<File>, size: u64) -> io::Result<()> {
    let file = Arc::clone(file);
    task::spawn_blocking(move || file.set_len(size))
        .await
        .map_err(join_err)?
}

/// Flushes file data and metadata to stable storage.
pub async fn sync_all(file: &Arc<File>) -> io::Result<()> {
    let file = Arc::clone(file);
    task::spawn_blocking(move || file.sync_all())
        .await
        .map_err(join_err)?
}

/// `fstat` on an open file.
pub async fn fstat(file: &Arc<File>) -> io::Result<FileStat> {
    let file = Arc::clone(file);
    task::spawn_blocking(move || file.metadata().map(|md| stat_from_metadata(&md)))
        .await
        .map_err(join_err)?
}

/// `fchmod` on an open file.
pub async fn fchmod(file: &Arc<File>, mode: u32) -> io::Result<()> {
    let file = Arc::clone(file);
    task::spawn_blocking(move || set_file_permissions(&file, mode))
        .await
        .map_err(join_err)?
}

#[cfg(unix)]
fn set_file_permissions(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_file_permissions(file: &File, mode: u32) -> io::Result<()> {
    let mut perm = file.metadata()?.permissions();
    perm.set_readonly(mode & 0o200 == 0);
    file.set_permissions(perm)
}

/// Sets access and modification times on an open file.
#[cfg(unix)]
pub async fn futimes(file: &Arc<File>, atime: u32, mtime: u32) -> io::Result<()> {
    use nix::sys::stat::futimens;
    use nix::sys::time::TimeSpec;
    use std::os::unix::io::AsRawFd;

    let file = Arc::clone(file);
    task::spawn_blocking(move || {
        futimens(
            file.as_raw_fd(),
            &TimeSpec::new(atime as i64, 0),
            &TimeSpec::new(mtime as i64, 0),
        )
        .map_err(|e| io::Error::from_raw_os_error(e as i32))
    })
    .await
    .map_err(join_err)?
}

/// Sets access and modification times on an open file.
#[cfg(not(unix))]
pub async fn futimes(_file: &Arc<File>, _atime: u32, _mtime: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "futimes is not supported on this platform",
    ))
}

/// `stat`, following symbolic links.
pub async fn stat(path: &Path) -> io::Result<FileStat> {
    let md = tokio::fs::metadata(path).await?;
    Ok(stat_from_metadata(&md))
}

/// `lstat`, not following symbolic links.
pub async fn lstat(path: &Path) -> io::Result<FileStat> {
    let md = tokio::fs::symlink_metadata(path).await?;
    Ok(stat_from_metadata(&md))
}

/// One directory entry with its lstat result.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    /// Bare file name within the directory.
    pub name: String,
    /// lstat of the entry; default-zeroed when the entry vanished mid-scan.
    pub stat: FileStat,
}

/// Opens a directory for iteration.
pub async fn open_dir(path: &Path) -> io::Result<ReadDir> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || std::fs::read_dir(path))
        .await
        .map_err(join_err)?
}

/// Pulls up to `max` entries from a directory iterator.
///
/// Returns the iterator for later continuation and whether it is exhausted.
pub async fn read_dir_batch(
    iter: ReadDir,
    max: usize,
) -> io::Result<(ReadDir, Vec<DirEntryInfo>, bool)> {
    task::spawn_blocking(move || {
        let mut iter = iter;
        let mut out = Vec::with_capacity(max.min(128));
        let mut exhausted = true;
        for entry in iter.by_ref() {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Entry may be unlinked between readdir and lstat; keep the name.
            let stat = entry
                .metadata()
                .map(|md| stat_from_metadata(&md))
                .unwrap_or_default();
            out.push(DirEntryInfo { name, stat });
            if out.len() >= max {
                exhausted = false;
                break;
            }
        }
        Ok((iter, out, exhausted))
    })
    .await
    .map_err(join_err)?
}

/// Whether this platform can create symbolic links.
pub fn symlinks_supported() -> bool {
    cfg!(unix)
}

/// Creates a symbolic link at `link` pointing at `target`.
#[cfg(unix)]
pub async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

/// Creates a symbolic link at `link` pointing at `target`.
#[cfg(not(unix))]
pub async fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

/// Reads the target of a symbolic link.
pub async fn readlink(path: &Path) -> io::Result<PathBuf> {
    tokio::fs::read_link(path).await
}

/// Creates a hard link at `dst` referring to `src`.
pub async fn hardlink(src: &Path, dst: &Path) -> io::Result<()> {
    tokio::fs::hard_link(src, dst).await
}

/// Renames a file or directory, replacing any existing target.
pub async fn rename(from: &Path, to: &Path) -> io::Result<()> {
    tokio::fs::rename(from, to).await
}

/// Removes a file.
pub async fn remove_file(path: &Path) -> io::Result<()> {
    tokio::fs::remove_file(path).await
}

/// Removes an empty directory.
pub async fn remove_dir(path: &Path) -> io::Result<()> {
    tokio::fs::remove_dir(path).await
}

/// Creates a directory, applying `mode` where the platform supports it.
#[cfg(unix)]
pub async fn create_dir(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        let mut builder = std::fs::DirBuilder::new();
        if let Some(mode) = mode {
            builder.mode(mode & 0o7777);
        }
        builder.create(path)
    })
    .await
    .map_err(join_err)?
}

/// Creates a directory, applying `mode` where the platform supports it.
#[cfg(not(unix))]
pub async fn create_dir(path: &Path, _mode: Option<u32>) -> io::Result<()> {
    tokio::fs::create_dir(path).await
}

/// Truncates a file by path.
pub async fn truncate(path: &Path, size: u64) -> io::Result<()> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_len(size)
    })
    .await
    .map_err(join_err)?
}

/// Changes permission bits by path.
#[cfg(unix)]
pub async fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777)).await
}

/// Changes permission bits by path.
#[cfg(not(unix))]
pub async fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    let mut perm = tokio::fs::metadata(path).await?.permissions();
    perm.set_readonly(mode & 0o200 == 0);
    tokio::fs::set_permissions(path, perm).await
}

/// Changes file ownership by path.
#[cfg(unix)]
pub async fn chown(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    use nix::unistd::{Gid, Uid};

    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        nix::unistd::chown(&path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|e| io::Error::from_raw_os_error(e as i32))
    })
    .await
    .map_err(join_err)?
}

/// Changes file ownership by path.
#[cfg(not(unix))]
pub async fn chown(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "chown is not supported on this platform",
    ))
}

/// Sets access and modification times by path.
#[cfg(unix)]
pub async fn utimes(path: &Path, atime: u32, mtime: u32) -> io::Result<()> {
    use nix::sys::time::TimeVal;

    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        nix::sys::stat::utimes(
            &path,
            &TimeVal::new(atime as i64, 0),
            &TimeVal::new(mtime as i64, 0),
        )
        .map_err(|e| io::Error::from_raw_os_error(e as i32))
    })
    .await
    .map_err(join_err)?
}

/// Sets access and modification times by path.
#[cfg(not(unix))]
pub async fn utimes(_path: &Path, _atime: u32, _mtime: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "utimes is not supported on this platform",
    ))
}

/// Filesystem statistics as reported by `statvfs(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatVfs {
    /// Preferred block size.
    pub bsize: u64,
    /// Fundamental block size.
    pub frsize: u64,
    /// Total blocks in units of `frsize`.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Free blocks available to unprivileged users.
    pub bavail: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
    /// Free inodes available to unprivileged users.
    pub favail: u64,
    /// Filesystem id.
    pub fsid: u64,
    /// Mount flags.
    pub flags: u64,
    /// Maximum filename length.
    pub namemax: u64,
}

/// Queries filesystem statistics for the filesystem containing `path`.
#[cfg(unix)]
pub async fn statvfs(path: &Path) -> io::Result<StatVfs> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        let vfs = nix::sys::statvfs::statvfs(&path)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(StatVfs {
            bsize: vfs.block_size() as u64,
            frsize: vfs.fragment_size() as u64,
            blocks: vfs.blocks() as u64,
            bfree: vfs.blocks_free() as u64,
            bavail: vfs.blocks_available() as u64,
            files: vfs.files() as u64,
            ffree: vfs.files_free() as u64,
            favail: vfs.files_available() as u64,
            fsid: vfs.filesystem_id() as u64,
            flags: vfs.flags().bits() as u64,
            namemax: vfs.name_max() as u64,
        })
    })
    .await
    .map_err(join_err)?
}

/// Queries filesystem statistics for the filesystem containing `path`.
#[cfg(not(unix))]
pub async fn statvfs(_path: &Path) -> io::Result<StatVfs> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "statvfs is not supported on this platform",
    ))
}

/// Resolves a path to canonical absolute form.
pub async fn canonicalize(path: &Path) -> io::Result<PathBuf> {
    tokio::fs::canonicalize(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sealink-fs-{}-{}",
            tag,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_positional_read_write() {
        let dir = scratch_dir("rw");
        let path = dir.join("data.bin");
        let file = open(
            &path,
            OpenMode {
                read: true,
                write: true,
                create: true,
                truncate: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let file = Arc::new(file);

        write_at(&file, 4, b"world".to_vec()).await.unwrap();
        write_at(&file, 0, b"hell".to_vec()).await.unwrap();

        let got = read_at(&file, 0, 16).await.unwrap();
        assert_eq!(&got, b"hellworld");

        // Read past EOF yields the short tail.
        let tail = read_at(&file, 7, 16).await.unwrap();
        assert_eq!(&tail, b"ld");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_stat_reports_type_bits() {
        let dir = scratch_dir("stat");
        let st = stat(&dir).await.unwrap();
        assert!(st.is_dir());
        assert!(!st.is_regular());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_read_dir_batch_exhaustion() {
        let dir = scratch_dir("batch");
        for i in 0..5 {
            std::fs::write(dir.join(format!("f{}", i)), b"x").unwrap();
        }

        let iter = open_dir(&dir).await.unwrap();
        let (iter, first, exhausted) = read_dir_batch(iter, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(!exhausted);

        let (_iter, rest, exhausted) = read_dir_batch(iter, 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(exhausted);

        std::fs::remove_dir_all(&dir).ok();
    }
}
