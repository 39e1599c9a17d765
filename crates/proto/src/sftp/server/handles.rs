//! Server-side handle registry.
//!
//! Maps opaque handle strings to open files or directory iterations. The
//! table lock guards only in-memory mutation and is never held across I/O;
//! workers clone the entry's shared resources out under the lock and then
//! release it before touching the filesystem.
//!
//! Each entry counts in-flight operations so a CLOSE can wait for
//! everything previously accepted against the handle before the handle is
//! retired, which is the one response-ordering guarantee the protocol
//! demands. For that to hold, [`HandleTable::begin_op`] must run in the
//! reader loop when a request is accepted, before its worker is spawned;
//! registering from inside the worker would let a later CLOSE's task win
//! the race to the table and retire the handle under the earlier request.

use std::collections::HashMap;
use std::fs::{File, ReadDir};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

/// Directory iteration state behind a per-handle lock, so concurrent
/// READDIRs on one handle serialize without involving the table lock.
#[derive(Debug)]
pub(crate) struct DirState {
    /// Remaining iterator; `None` once exhausted.
    pub iter: Option<ReadDir>,
    /// Set when the final EOF has been produced.
    pub exhausted: bool,
}

/// What a handle refers to.
#[derive(Debug, Clone)]
pub(crate) enum HandleKind {
    /// An open file. Positional I/O shares the descriptor.
    File {
        /// Shared descriptor.
        file: Arc<File>,
        /// Opened with append semantics; WRITE offsets are ignored.
        append: bool,
    },
    /// A directory iteration.
    Dir(Arc<tokio::sync::Mutex<DirState>>),
}

#[derive(Debug)]
struct Entry {
    kind: HandleKind,
    path: PathBuf,
    inflight: u32,
    closing: bool,
}

/// Registry of live handles for one session.
#[derive(Debug)]
pub(crate) struct HandleTable {
    entries: Mutex<HashMap<String, Entry>>,
    counter: AtomicU64,
    salt: u64,
    idle: Notify,
}

/// Borrow of a handle's resources for the duration of one request.
///
/// Dropping the guard retires the in-flight count and wakes any CLOSE
/// waiting on the handle.
pub(crate) struct OpGuard {
    table: Arc<HandleTable>,
    handle: String,
    kind: HandleKind,
    path: PathBuf,
}

impl OpGuard {
    pub fn kind(&self) -> &HandleKind {
        &self.kind
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        let mut entries = self.table.entries.lock().expect("handle table lock poisoned");
        if let Some(entry) = entries.get_mut(&self.handle) {
            entry.inflight -= 1;
            if entry.inflight == 0 {
                self.table.idle.notify_waiters();
            }
        }
    }
}

impl HandleTable {
    /// Creates an empty table with a random session salt.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(1),
            salt: rand::random(),
            idle: Notify::new(),
        }
    }

    /// Issues a fresh handle string: hex of the monotonic counter mixed
    /// with the session salt. Unique per session by counter monotonicity,
    /// 16 octets, well under the protocol's 256-octet cap.
    fn next_handle(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        hex::encode((seq ^ self.salt).to_be_bytes())
    }

    /// Registers an open file and returns its handle.
    pub fn insert_file(&self, path: PathBuf, file: File, append: bool) -> String {
        let handle = self.next_handle();
        let entry = Entry {
            kind: HandleKind::File {
                file: Arc::new(file),
                append,
            },
            path,
            inflight: 0,
            closing: false,
        };
        self.entries
            .lock()
            .expect("handle table lock poisoned")
            .insert(handle.clone(), entry);
        handle
    }

    /// Registers a directory iteration and returns its handle.
    pub fn insert_dir(&self, path: PathBuf, iter: ReadDir) -> String {
        let handle = self.next_handle();
        let entry = Entry {
            kind: HandleKind::Dir(Arc::new(tokio::sync::Mutex::new(DirState {
                iter: Some(iter),
                exhausted: false,
            }))),
            path,
            inflight: 0,
            closing: false,
        };
        self.entries
            .lock()
            .expect("handle table lock poisoned")
            .insert(handle.clone(), entry);
        handle
    }

    /// Starts an operation against a handle.
    ///
    /// Returns `None` for unknown handles and for handles whose CLOSE has
    /// already been accepted.
    pub fn begin_op(self: &Arc<Self>, handle: &str) -> Option<OpGuard> {
        let mut entries = self.entries.lock().expect("handle table lock poisoned");
        let entry = entries.get_mut(handle)?;
        if entry.closing {
            return None;
        }
        entry.inflight += 1;
        Some(OpGuard {
            table: Arc::clone(self),
            handle: handle.to_string(),
            kind: entry.kind.clone(),
            path: entry.path.clone(),
        })
    }

    /// Retires a handle, waiting until previously accepted operations on it
    /// have finished. Returns the entry's resources for final teardown, or
    /// `None` if the handle was unknown or already being closed.
    pub async fn close(&self, handle: &str) -> Option<(HandleKind, PathBuf)> {
        // Claim the close; finish immediately when nothing is in flight.
        {
            let mut entries = self.entries.lock().expect("handle table lock poisoned");
            match entries.get_mut(handle) {
                None => return None,
                Some(entry) if entry.closing => return None,
                Some(entry) if entry.inflight == 0 => {
                    let entry = entries.remove(handle).expect("entry vanished");
                    return Some((entry.kind, entry.path));
                }
                Some(entry) => entry.closing = true,
            }
        }

        // Wait for previously accepted operations to drain. The Notified
        // future is created before each check so a wakeup between the check
        // and the await is not lost.
        loop {
            let notified = self.idle.notified();
            {
                let mut entries = self.entries.lock().expect("handle table lock poisoned");
                match entries.get_mut(handle) {
                    None => return None,
                    Some(entry) if entry.inflight == 0 => {
                        let entry = entries.remove(handle).expect("entry vanished");
                        return Some((entry.kind, entry.path));
                    }
                    Some(_) => {}
                }
            }
            notified.await;
        }
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("handle table lock poisoned").len()
    }

    /// Drops every handle at session teardown. Descriptors close when the
    /// last outstanding borrow of each entry ends.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("handle table lock poisoned");
        let dropped = entries.len();
        entries.clear();
        if dropped > 0 {
            debug!(dropped, "closed remaining handles at session teardown");
        }
    }
}
