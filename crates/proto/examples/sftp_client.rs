//! Simple SFTP Client Example
//!
//! Connects to the server example over plain TCP and runs one command.
//!
//! Usage:
//!   cargo run --example sftp_client <addr> list <path>
//!   cargo run --example sftp_client <addr> get <remote> <local>
//!   cargo run --example sftp_client <addr> put <local> <remote>
//!
//! Example:
//!   cargo run --example sftp_client 127.0.0.1:2022 list /tmp

use sealink_proto::sftp::client::SftpClient;
use std::env;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: sftp_client <addr> list|get|put <args...>");
        std::process::exit(2);
    }

    let socket = tokio::net::TcpStream::connect(&args[1]).await?;
    let (input, output) = tokio::io::split(socket);
    let client = SftpClient::connect(input, output).await?;
    println!(
        "connected: protocol v{}, {} extensions",
        client.version(),
        client.extensions().len()
    );

    match args[2].as_str() {
        "list" => {
            for entry in client.read_dir(&args[3]).await? {
                println!("{}", entry.longname);
            }
        }
        "get" => {
            if args.len() < 5 {
                eprintln!("usage: sftp_client <addr> get <remote> <local>");
                std::process::exit(2);
            }
            let bytes = client.download(&args[3], Path::new(&args[4])).await?;
            println!("downloaded {} bytes", bytes);
        }
        "put" => {
            if args.len() < 5 {
                eprintln!("usage: sftp_client <addr> put <local> <remote>");
                std::process::exit(2);
            }
            let bytes = client.upload(Path::new(&args[3]), &args[4]).await?;
            println!("uploaded {} bytes", bytes);
        }
        other => {
            eprintln!("unknown command: {}", other);
            std::process::exit(2);
        }
    }

    client.close().await;
    Ok(())
}
