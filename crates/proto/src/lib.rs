//! Protocol implementations for the Sealink file-transfer stack.
//!
//! This crate provides a Rust implementation of the SFTP version 3 wire
//! protocol: both the server request pipeline and the client dispatcher,
//! built over any pre-authenticated bidirectional byte stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use sealink_proto::sftp::client::SftpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // `input`/`output` come from the host: an SSH channel or a spawned
//! // sftp-server subprocess's stdio pair.
//! # let (a, _b) = tokio::io::duplex(1024);
//! # let (input, output) = tokio::io::split(a);
//! let client = SftpClient::connect(input, output).await?;
//! let resolved = client.realpath(".").await?;
//! println!("remote cwd: {}", resolved);
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02)
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod sftp;
