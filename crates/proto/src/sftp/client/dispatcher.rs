//! Client request/response correlation engine.
//!
//! The dispatcher owns both halves of the byte stream through two tasks: a
//! writer that drains a bounded outbound queue, and a reader that decodes
//! responses and routes each to the completion sink registered under its
//! request identifier. Many concurrent operations multiplex over the one
//! stream; ordering is whatever the server chose, which is why sinks are
//! keyed by identifier rather than position.
//!
//! Every request registered here resolves exactly once: with the server's
//! response, or with a connection-lost error when the session dies first.
//! A caller that abandons its waiter leaves the record in place so the
//! eventual reply is still consumed and discarded.

use super::super::error::{Error, Result};
use super::super::packet::{self, PacketType, Request, Response, VersionInfo, SFTP_VERSION};
use super::super::wire::WireReader;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

struct PendingSink {
    tx: oneshot::Sender<Result<Response>>,
    // Held until the reply is delivered so abandoned requests still count
    // against the in-flight bound.
    _permit: OwnedSemaphorePermit,
}

struct Shared {
    pending: Mutex<HashMap<u32, PendingSink>>,
    next_id: AtomicU32,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
}

impl Shared {
    /// Fails every outstanding sink and refuses new registrations.
    fn fail_all(&self) {
        let drained: Vec<PendingSink> = {
            let mut pending = self.pending.lock().expect("pending map lock poisoned");
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().map(|(_, sink)| sink).collect()
        };
        if !drained.is_empty() {
            warn!(
                outstanding = drained.len(),
                "failing outstanding requests with connection-lost"
            );
        }
        for sink in drained {
            let _ = sink.tx.send(Err(Error::ConnectionLost));
        }
    }
}

/// Completion sink handed back by [`Dispatcher::send`].
pub(crate) struct ResponseWaiter {
    rx: oneshot::Receiver<Result<Response>>,
}

impl ResponseWaiter {
    /// Waits for the response correlated with this request.
    pub async fn wait(self) -> Result<Response> {
        self.rx.await.map_err(|_| Error::ConnectionLost)?
    }
}

/// The client-side request multiplexer.
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    out_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Performs the INIT/VERSION handshake, then spawns the reader and
    /// writer tasks that own the stream halves for the session's lifetime.
    pub async fn connect<R, W>(
        mut input: R,
        mut output: W,
        max_packet_size: usize,
        max_inflight: usize,
    ) -> Result<(Arc<Self>, VersionInfo)>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        output.write_all(&packet::encode_init(SFTP_VERSION)).await?;
        output.flush().await?;

        let (ptype, body) = packet::read_frame(&mut input, max_packet_size)
            .await?
            .ok_or(Error::ConnectionLost)?;
        if PacketType::from_u8(ptype) != Some(PacketType::Version) {
            return Err(Error::Protocol(format!(
                "expected VERSION, got packet type {}",
                ptype
            )));
        }
        let info = packet::decode_version_body(&body)?;
        debug!(
            version = info.version,
            extensions = info.extensions.len(),
            "SFTP handshake complete"
        );

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            slots: Arc::new(Semaphore::new(max_inflight)),
            closed: AtomicBool::new(false),
        });

        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(max_inflight);
        let writer_shared = Arc::clone(&shared);
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = output.write_all(&frame).await {
                    warn!(error = %e, "outbound stream failed");
                    writer_shared.fail_all();
                    return;
                }
                if let Err(e) = output.flush().await {
                    warn!(error = %e, "outbound flush failed");
                    writer_shared.fail_all();
                    return;
                }
            }
            // Queue closed: graceful shutdown. Signal EOF to the server.
            output.shutdown().await.ok();
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            read_loop(input, max_packet_size, &reader_shared).await;
            reader_shared.fail_all();
        });

        let dispatcher = Arc::new(Self {
            shared,
            out_tx: Mutex::new(Some(out_tx)),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        });
        Ok((dispatcher, info))
    }

    /// Enqueues a request and returns its completion sink.
    ///
    /// Blocks while the in-flight set is full. The identifier is drawn from
    /// a wrapping counter and re-rolled past any identifier still
    /// outstanding, so wraparound never collides.
    pub async fn send(&self, request: Request) -> Result<ResponseWaiter> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let permit = Arc::clone(&self.shared.slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::SessionClosed)?;

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self
                .shared
                .pending
                .lock()
                .expect("pending map lock poisoned");
            // Checked under the map lock: fail_all drains and marks closed
            // under the same lock, so no sink can register after it ran.
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(Error::SessionClosed);
            }
            let mut id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            while pending.contains_key(&id) {
                id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            }
            pending.insert(id, PendingSink { tx, _permit: permit });
            id
        };

        let frame = request.encode(id);
        let sender = self
            .out_tx
            .lock()
            .expect("out queue lock poisoned")
            .clone();
        let delivered = match sender {
            Some(sender) => sender.send(frame).await.is_ok(),
            None => false,
        };
        if !delivered {
            self.shared
                .pending
                .lock()
                .expect("pending map lock poisoned")
                .remove(&id);
            return Err(Error::ConnectionLost);
        }
        Ok(ResponseWaiter { rx })
    }

    /// Enqueues a request and waits for its response.
    pub async fn call(&self, request: Request) -> Result<Response> {
        self.send(request).await?.wait().await
    }

    /// True once the session is no longer usable.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting responses.
    pub fn pending_requests(&self) -> usize {
        self.shared
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .len()
    }

    /// Shuts the session down.
    ///
    /// Queued outbound frames are flushed, the output half is closed so the
    /// server can drain, and every sink still outstanding resolves with
    /// connection-lost.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let _ = self
            .out_tx
            .lock()
            .expect("out queue lock poisoned")
            .take();

        let writer = self.writer.lock().expect("writer handle lock poisoned").take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        let reader = self.reader.lock().expect("reader handle lock poisoned").take();
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }
        self.shared.fail_all();
        debug!("dispatcher closed");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.lock().expect("writer handle lock poisoned").take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.lock().expect("reader handle lock poisoned").take() {
            reader.abort();
        }
        self.shared.fail_all();
    }
}

/// Decodes responses and routes them to their sinks until the stream ends
/// or the peer violates the protocol.
async fn read_loop<R>(mut input: R, max_packet_size: usize, shared: &Shared)
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let (ptype, body) = match packet::read_frame(&mut input, max_packet_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("inbound stream closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "inbound stream failed");
                return;
            }
        };

        let packet_type = match PacketType::from_u8(ptype) {
            Some(pt) => pt,
            None => {
                error!(packet_type = ptype, "unknown packet type from server");
                return;
            }
        };

        let mut reader = WireReader::new(&body);
        let id = match reader.read_u32("response id") {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "malformed response frame");
                return;
            }
        };
        let response = match Response::decode(packet_type, reader) {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "malformed response body");
                return;
            }
        };

        let sink = shared
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&id);
        match sink {
            Some(sink) => {
                if sink.tx.send(Ok(response)).is_err() {
                    // Caller abandoned the request; the reply is discarded.
                    debug!(id, "discarding reply for abandoned request");
                }
            }
            None => {
                // An identifier we never issued is a protocol violation
                // that poisons correlation for the whole session.
                error!(id, "response for unknown request id");
                return;
            }
        }
    }
}
