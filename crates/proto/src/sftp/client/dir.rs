//! Lazy directory tree walker.
//!
//! Depth-first enumeration driven one step at a time by the caller. Each
//! step yields one entry; after a directory entry the caller may call
//! [`Walker::skip_current_dir`] to avoid descending into it. Listing
//! failures are attached to the step for the directory that produced them
//! instead of aborting the walk.

use super::super::error::Error;
use super::super::types::FileAttributes;
use super::SftpClient;
use tracing::debug;

/// One step of a walk.
#[derive(Debug)]
pub struct WalkEntry {
    /// Full remote path of the entry.
    pub path: String,
    /// Attributes from the listing (lstat semantics).
    pub attrs: FileAttributes,
    /// Depth below the walk root; the root itself is 0.
    pub depth: usize,
    /// Set when enumerating this entry's children failed.
    pub error: Option<Error>,
}

enum Item {
    /// Stat the root and yield it.
    Start { path: String },
    /// Yield one already-listed entry.
    Entry {
        path: String,
        attrs: FileAttributes,
        depth: usize,
    },
    /// List a directory and queue its children.
    List { path: String, depth: usize },
}

/// Lazy depth-first walker over a remote directory tree.
pub struct Walker<'a> {
    client: &'a SftpClient,
    stack: Vec<Item>,
    descend_pending: bool,
}

impl<'a> Walker<'a> {
    pub(crate) fn new(client: &'a SftpClient, root: &str) -> Self {
        Self {
            client,
            stack: vec![Item::Start {
                path: root.to_string(),
            }],
            descend_pending: false,
        }
    }

    /// Skips descent into the directory most recently yielded.
    ///
    /// Only meaningful directly after [`Walker::next`] returned a directory
    /// entry; otherwise it is a no-op.
    pub fn skip_current_dir(&mut self) {
        if self.descend_pending {
            if let Some(Item::List { path, .. }) = self.stack.pop() {
                debug!(path = %path, "skipping subtree");
            }
            self.descend_pending = false;
        }
    }

    /// Advances to the next entry. Returns `None` when the walk is done.
    pub async fn next(&mut self) -> Option<WalkEntry> {
        loop {
            self.descend_pending = false;
            match self.stack.pop()? {
                Item::Start { path } => match self.client.lstat(&path).await {
                    Ok(attrs) => {
                        if attrs.is_dir() {
                            self.stack.push(Item::List {
                                path: path.clone(),
                                depth: 1,
                            });
                            self.descend_pending = true;
                        }
                        return Some(WalkEntry {
                            path,
                            attrs,
                            depth: 0,
                            error: None,
                        });
                    }
                    Err(e) => {
                        return Some(WalkEntry {
                            path,
                            attrs: FileAttributes::new(),
                            depth: 0,
                            error: Some(e),
                        })
                    }
                },
                Item::Entry { path, attrs, depth } => {
                    // Descend into directories, but never through symlinks.
                    if attrs.is_dir() && !attrs.is_symlink() {
                        self.stack.push(Item::List {
                            path: path.clone(),
                            depth: depth + 1,
                        });
                        self.descend_pending = true;
                    }
                    return Some(WalkEntry {
                        path,
                        attrs,
                        depth,
                        error: None,
                    });
                }
                Item::List { path, depth } => match self.client.read_dir(&path).await {
                    Ok(mut entries) => {
                        entries.retain(|e| e.filename != "." && e.filename != "..");
                        // Reverse-sorted push gives lexicographic pop order.
                        entries.sort_by(|a, b| b.filename.cmp(&a.filename));
                        for entry in entries {
                            let child = if path.ends_with('/') {
                                format!("{}{}", path, entry.filename)
                            } else {
                                format!("{}/{}", path, entry.filename)
                            };
                            self.stack.push(Item::Entry {
                                path: child,
                                attrs: entry.attrs,
                                depth,
                            });
                        }
                        continue;
                    }
                    Err(e) => {
                        // Attach the failure to the directory's step and
                        // keep walking its siblings.
                        return Some(WalkEntry {
                            path,
                            attrs: FileAttributes::new(),
                            depth: depth - 1,
                            error: Some(e),
                        });
                    }
                },
            }
        }
    }
}
