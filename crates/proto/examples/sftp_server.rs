//! Simple SFTP Server Example
//!
//! Serves the local filesystem over plain TCP. There is no authentication
//! or encryption here: the core expects the host to provide a
//! pre-authenticated stream, and for demonstration purposes that host is
//! a bare TCP listener on localhost.
//!
//! Usage:
//!   cargo run --example sftp_server [bind_address]
//!
//! Example:
//!   cargo run --example sftp_server 127.0.0.1:2022
//!
//! Then point the client example at it:
//!   cargo run --example sftp_client 127.0.0.1:2022 list /tmp

use sealink_proto::sftp::server::{SftpServer, SftpServerConfig};
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let bind_addr = if args.len() > 1 {
        args[1].clone()
    } else {
        "127.0.0.1:2022".to_string()
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("SFTP server listening on {}", bind_addr);

    let server = SftpServer::new(SftpServerConfig::default())?;
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("session from {}", peer);
        let server = server.clone();
        tokio::spawn(async move {
            let (input, output) = tokio::io::split(socket);
            if let Err(e) = server.serve(input, output).await {
                error!("session from {} ended with error: {}", peer, e);
            } else {
                info!("session from {} finished", peer);
            }
        });
    }
}
