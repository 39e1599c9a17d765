//! File and directory transfer helpers.
//!
//! Directory copies create the full directory skeleton as they walk, then
//! pipeline file contents through the sequential streams. Symbolic links
//! are preserved as links where the target platform supports them and
//! skipped with a diagnostic where it does not.

use super::super::error::{Error, Result};
use super::super::types::FileAttributes;
use super::SftpClient;
use sealink_platform::fs as localfs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

impl SftpClient {
    /// Uploads one local file to `remote`, returning the bytes written.
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let mut src = tokio::fs::File::open(local).await?;
        let file = self.create(remote).await?;
        let mut total = 0u64;
        {
            let mut writer = file.writer(0);
            let mut buf = vec![0u8; self.config.chunk_size];
            loop {
                let n = src.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                writer.write(&buf[..n]).await?;
                total += n as u64;
            }
            writer.flush().await?;
        }
        file.close().await?;
        debug!(local = %local.display(), remote, bytes = total, "uploaded file");
        Ok(total)
    }

    /// Downloads one remote file to `local`, returning the bytes read.
    pub async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let file = self.open(remote).await?;
        let mut dst = tokio::fs::File::create(local).await?;
        let mut total = 0u64;
        {
            let mut reader = file.reader(0);
            while let Some(chunk) = reader.next_chunk().await? {
                dst.write_all(&chunk).await?;
                total += chunk.len() as u64;
            }
        }
        dst.flush().await?;
        file.close().await?;
        debug!(remote, local = %local.display(), bytes = total, "downloaded file");
        Ok(total)
    }

    /// Recursively uploads a local directory tree under `remote_root`.
    ///
    /// Directories are created on the server before the files inside them;
    /// file contents are pipelined. With `preserve`, mode bits and
    /// timestamps are replicated.
    pub async fn upload_dir(
        &self,
        local_root: &Path,
        remote_root: &str,
        preserve: bool,
    ) -> Result<()> {
        let root = localfs::lstat(local_root).await?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "{} is not a directory",
                local_root.display()
            )));
        }
        self.ensure_remote_dir(remote_root, preserve.then(|| root.permissions()))
            .await?;

        let mut dir_times: Vec<(String, u32, u32)> = Vec::new();
        if preserve {
            dir_times.push((remote_root.to_string(), root.atime, root.mtime));
        }

        let mut stack: Vec<(PathBuf, String)> =
            vec![(local_root.to_path_buf(), remote_root.to_string())];
        while let Some((local_dir, remote_dir)) = stack.pop() {
            let iter = localfs::open_dir(&local_dir).await?;
            let (_iter, entries, _done) = localfs::read_dir_batch(iter, usize::MAX).await?;
            for entry in entries {
                let local_path = local_dir.join(&entry.name);
                let remote_path = format!("{}/{}", remote_dir, entry.name);
                if entry.stat.is_symlink() {
                    match localfs::readlink(&local_path).await {
                        Ok(target) => {
                            let target = target.to_string_lossy().into_owned();
                            if let Err(e) = self.symlink(&target, &remote_path).await {
                                warn!(path = %local_path.display(), error = %e,
                                      "skipping symlink the server refused");
                            }
                        }
                        Err(e) => {
                            warn!(path = %local_path.display(), error = %e,
                                  "skipping unreadable symlink");
                        }
                    }
                } else if entry.stat.is_dir() {
                    self.ensure_remote_dir(
                        &remote_path,
                        preserve.then(|| entry.stat.permissions()),
                    )
                    .await?;
                    if preserve {
                        dir_times.push((remote_path.clone(), entry.stat.atime, entry.stat.mtime));
                    }
                    stack.push((local_path, remote_path));
                } else if entry.stat.is_regular() {
                    self.upload(&local_path, &remote_path).await?;
                    if preserve {
                        self.setstat(
                            &remote_path,
                            FileAttributes {
                                permissions: Some(entry.stat.permissions()),
                                atime: Some(entry.stat.atime),
                                mtime: Some(entry.stat.mtime),
                                ..Default::default()
                            },
                        )
                        .await?;
                    }
                } else {
                    warn!(path = %local_path.display(), "skipping special file");
                }
            }
        }

        // Directory timestamps last, deepest first, so writing children does
        // not disturb them.
        for (path, atime, mtime) in dir_times.into_iter().rev() {
            if let Err(e) = self
                .setstat(
                    &path,
                    FileAttributes {
                        atime: Some(atime),
                        mtime: Some(mtime),
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(path, error = %e, "could not preserve directory times");
            }
        }

        info!(local = %local_root.display(), remote = remote_root, "recursive upload complete");
        Ok(())
    }

    /// Recursively downloads a remote directory tree under `local_root`.
    pub async fn download_dir(
        &self,
        remote_root: &str,
        local_root: &Path,
        preserve: bool,
    ) -> Result<()> {
        let root = self.stat(remote_root).await?;
        if !root.is_dir() {
            return Err(Error::Config(format!("{} is not a directory", remote_root)));
        }
        ensure_local_dir(local_root, preserve.then(|| root.permissions.unwrap_or(0o755))).await?;

        let mut dir_times: Vec<(PathBuf, u32, u32)> = Vec::new();
        if preserve {
            if let (Some(atime), Some(mtime)) = (root.atime, root.mtime) {
                dir_times.push((local_root.to_path_buf(), atime, mtime));
            }
        }

        let mut stack: Vec<(String, PathBuf)> =
            vec![(remote_root.to_string(), local_root.to_path_buf())];
        while let Some((remote_dir, local_dir)) = stack.pop() {
            for entry in self.read_dir(&remote_dir).await? {
                if entry.filename == "." || entry.filename == ".." {
                    continue;
                }
                let remote_path = format!("{}/{}", remote_dir, entry.filename);
                let local_path = local_dir.join(&entry.filename);
                if entry.attrs.is_symlink() {
                    match self.readlink(&remote_path).await {
                        Ok(target) => {
                            match localfs::symlink(Path::new(&target), &local_path).await {
                                Ok(()) => {}
                                Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                                    warn!(path = remote_path,
                                          "skipping symlink: unsupported on this platform");
                                }
                                Err(e) => {
                                    warn!(path = remote_path, error = %e, "skipping symlink");
                                }
                            }
                        }
                        Err(e) => {
                            warn!(path = remote_path, error = %e, "skipping unreadable symlink");
                        }
                    }
                } else if entry.attrs.is_dir() {
                    ensure_local_dir(
                        &local_path,
                        preserve.then(|| entry.attrs.permissions.unwrap_or(0o755)),
                    )
                    .await?;
                    if preserve {
                        if let (Some(atime), Some(mtime)) = (entry.attrs.atime, entry.attrs.mtime)
                        {
                            dir_times.push((local_path.clone(), atime, mtime));
                        }
                    }
                    stack.push((remote_path, local_path));
                } else {
                    self.download(&remote_path, &local_path).await?;
                    if preserve {
                        if let Some(mode) = entry.attrs.permissions {
                            localfs::chmod(&local_path, mode).await?;
                        }
                        if let (Some(atime), Some(mtime)) = (entry.attrs.atime, entry.attrs.mtime)
                        {
                            if let Err(e) = localfs::utimes(&local_path, atime, mtime).await {
                                warn!(path = %local_path.display(), error = %e,
                                      "could not preserve file times");
                            }
                        }
                    }
                }
            }
        }

        for (path, atime, mtime) in dir_times.into_iter().rev() {
            if let Err(e) = localfs::utimes(&path, atime, mtime).await {
                warn!(path = %path.display(), error = %e, "could not preserve directory times");
            }
        }

        info!(remote = remote_root, local = %local_root.display(), "recursive download complete");
        Ok(())
    }

    /// Creates a remote directory, tolerating one that already exists.
    async fn ensure_remote_dir(&self, path: &str, mode: Option<u32>) -> Result<()> {
        match self.mkdir(path, mode).await {
            Ok(()) => Ok(()),
            Err(e) => match self.stat(path).await {
                Ok(attrs) if attrs.is_dir() => Ok(()),
                _ => Err(e),
            },
        }
    }
}

/// Creates a local directory, tolerating one that already exists.
async fn ensure_local_dir(path: &Path, mode: Option<u32>) -> Result<()> {
    match localfs::create_dir(path, mode).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let st = localfs::stat(path).await?;
            if st.is_dir() {
                Ok(())
            } else {
                Err(Error::Io(e))
            }
        }
        Err(e) => Err(Error::Io(e)),
    }
}
