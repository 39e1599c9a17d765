//! SFTP (SSH File Transfer Protocol) version 3 core.
//!
//! Both halves of the protocol over a single pre-authenticated byte stream:
//! a server that dispatches requests against the local filesystem, and a
//! client that multiplexes many concurrent operations through one
//! request/response correlation engine. The SSH transport itself is out of
//! scope; the host hands each session an already-authenticated stream pair
//! (an SSH channel, or a subprocess stdio pair).
//!
//! # Architecture
//!
//! ```text
//! Server:  input ─> codec ─> worker pool (bounded) ─> codec ─> single writer ─> output
//!                              │
//!                              └─ handle table + platform fs shim
//!
//! Client:  user API ─> dispatcher (id assignment, bounded in-flight) ─> output
//!          input ─> codec ─> correlator ─> per-request completion sink ─> user API
//! ```
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|  (extension pairs)
//!   |-- SSH_FXP_OPEN -------------->|
//!   |<- SSH_FXP_HANDLE -------------|
//!   |-- SSH_FXP_READ (pipelined) -->|
//!   |<- SSH_FXP_DATA (any order) ---|
//!   |-- SSH_FXP_CLOSE ------------->|
//!   |<- SSH_FXP_STATUS -------------|  (held until prior ops finish)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sealink_proto::sftp::client::SftpClient;
//! use sealink_proto::sftp::server::{SftpServer, SftpServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Host wiring: any AsyncRead/AsyncWrite pair works.
//! let (client_side, server_side) = tokio::io::duplex(64 * 1024);
//! let (server_in, server_out) = tokio::io::split(server_side);
//! let (client_in, client_out) = tokio::io::split(client_side);
//!
//! let server = SftpServer::new(SftpServerConfig::default())?;
//! tokio::spawn(async move { server.serve(server_in, server_out).await });
//!
//! let client = SftpClient::connect(client_in, client_out).await?;
//! let listing = client.read_dir("/tmp").await?;
//! for entry in listing {
//!     println!("{}", entry.longname);
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02) - the wire format spoken here
//! - [OpenSSH protocol extensions](https://cvsweb.openbsd.org/src/usr.bin/ssh/PROTOCOL) - the `@openssh.com` extension pairs

pub mod alloc;
pub mod client;
pub mod error;
pub mod extensions;
pub mod glob;
pub mod packet;
pub mod server;
pub mod types;
pub mod wire;

pub use alloc::{Page, PagePool};
pub use client::{SftpClient, SftpClientConfig};
pub use error::{Error, Result};
pub use extensions::{Extension, ExtensionSet};
pub use packet::{NameEntry, PacketType, Request, Response, SFTP_VERSION};
pub use server::{SftpServer, SftpServerConfig};
pub use types::{FileAttributes, FileType, OpenFlags, StatusCode};
