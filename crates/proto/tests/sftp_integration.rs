//! Integration tests for SFTP client-server communication.
//!
//! These tests run a real server and client over an in-process duplex
//! stream, with the server operating on scratch directories under the
//! system temp dir. They validate the complete protocol flow including:
//! - Version negotiation and extension advertisement
//! - Pipelined reads and writes with out-of-order reassembly
//! - Handle lifecycle and CLOSE ordering
//! - Recursive directory transfer
//! - Graceful shutdown under load

use rand::{Rng, RngCore};
use sealink_proto::sftp::client::{SftpClient, SftpClientConfig};
use sealink_proto::sftp::error::Error;
use sealink_proto::sftp::server::{SftpServer, SftpServerConfig};
use sealink_proto::sftp::types::{FileAttributes, OpenFlags, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

type ServerHandle = JoinHandle<sealink_proto::sftp::Result<()>>;

/// Spins up a connected client/server pair over a duplex stream.
async fn start_session(
    server_config: SftpServerConfig,
    client_config: SftpClientConfig,
) -> (SftpClient, ServerHandle) {
    let (client_side, server_side) = tokio::io::duplex(256 * 1024);
    let (server_in, server_out) = tokio::io::split(server_side);
    let (client_in, client_out) = tokio::io::split(client_side);

    let server = SftpServer::new(server_config).unwrap();
    let server_task = tokio::spawn(async move { server.serve(server_in, server_out).await });

    let client = SftpClient::connect_with_config(client_in, client_out, client_config)
        .await
        .unwrap();
    (client, server_task)
}

async fn start_default_session() -> (SftpClient, ServerHandle) {
    start_session(SftpServerConfig::default(), SftpClientConfig::default()).await
}

/// Fresh scratch directory under the system temp dir.
fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "sealink-it-{}-{}-{}",
        tag,
        std::process::id(),
        rand::random::<u32>()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn path_str(path: &PathBuf) -> String {
    path.to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_handshake_advertises_extensions() {
    let (client, server_task) = start_default_session().await;

    assert_eq!(client.version(), 3);
    assert!(client.extensions().supports("posix-rename@openssh.com"));
    assert!(client.extensions().supports("limits@openssh.com"));

    let limits = client.limits().await.unwrap();
    assert!(limits.max_packet_length >= 32 * 1024);

    client.close().await;
    server_task.await.unwrap().unwrap();
}

/// Scenario: round-trip put. 10 MiB of random bytes written under a fresh
/// name and read back bytewise equal, through the pipelined streams.
#[tokio::test]
async fn test_roundtrip_put_10_mib() {
    let dir = scratch_dir("put");
    let (client, server_task) = start_default_session().await;

    let mut payload = vec![0u8; 10 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);
    let remote = path_str(&dir.join("blob.bin"));

    let file = client.create(&remote).await.unwrap();
    {
        let mut writer = file.writer(0);
        writer.write(&payload).await.unwrap();
        writer.flush().await.unwrap();
    }
    file.close().await.unwrap();

    let file = client.open(&remote).await.unwrap();
    let got = {
        let mut reader = file.reader(0);
        reader.read_to_end().await.unwrap()
    };
    file.close().await.unwrap();

    assert_eq!(got.len(), payload.len());
    assert!(got == payload, "round-tripped bytes differ");

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario: resume with append. First half written normally, the rest
/// through an append-mode handle; the final file equals the whole buffer.
#[tokio::test]
async fn test_resume_with_append() {
    let dir = scratch_dir("append");
    let (client, server_task) = start_default_session().await;

    let mut payload = vec![0u8; 2 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);
    let remote = path_str(&dir.join("resumable.bin"));
    let half = payload.len() / 2;

    let file = client.create(&remote).await.unwrap();
    file.write_at(0, &payload[..half]).await.unwrap();
    file.close().await.unwrap();

    let file = client
        .open_with(&remote, OpenFlags::append(), FileAttributes::new())
        .await
        .unwrap();
    {
        let mut writer = file.writer(0);
        writer.write(&payload[half..]).await.unwrap();
        writer.flush().await.unwrap();
    }
    file.close().await.unwrap();

    let on_disk = std::fs::read(&remote).unwrap();
    assert!(on_disk == payload, "appended content differs");

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario: recursive copy of a depth-3 tree with mixed file sizes and a
/// symlink; modes, sizes, and mtimes survive within a second.
#[cfg(unix)]
#[tokio::test]
async fn test_recursive_copy_preserves_tree() {
    use std::os::unix::fs::PermissionsExt;

    let src = scratch_dir("copy-src");
    let dst_parent = scratch_dir("copy-dst");
    let dst = dst_parent.join("tree");

    // depth 3: src/a/b/c
    let deep = src.join("a").join("b").join("c");
    std::fs::create_dir_all(&deep).unwrap();
    let sizes: &[(usize, &str)] = &[
        (0, "empty.bin"),
        (1, "one.bin"),
        (4 * 1024, "four_k.bin"),
        (1024 * 1024, "one_meg.bin"),
    ];
    for (size, name) in sizes {
        let mut content = vec![0u8; *size];
        rand::thread_rng().fill_bytes(&mut content);
        std::fs::write(deep.join(name), &content).unwrap();
    }
    std::fs::set_permissions(
        deep.join("four_k.bin"),
        std::fs::Permissions::from_mode(0o600),
    )
    .unwrap();
    std::os::unix::fs::symlink("one.bin", src.join("a").join("link")).unwrap();

    let (client, server_task) = start_default_session().await;
    client
        .upload_dir(&src, &path_str(&dst), true)
        .await
        .unwrap();

    for (size, name) in sizes {
        let copied = dst.join("a").join("b").join("c").join(name);
        let orig = deep.join(name);
        let copied_md = std::fs::metadata(&copied).unwrap();
        let orig_md = std::fs::metadata(&orig).unwrap();
        assert_eq!(copied_md.len() as usize, *size, "{} size", name);
        assert_eq!(
            copied_md.permissions().mode() & 0o7777,
            orig_md.permissions().mode() & 0o7777,
            "{} mode",
            name
        );
        let copied_mtime = copied_md
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let orig_mtime = orig_md
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert!((copied_mtime - orig_mtime).abs() <= 1, "{} mtime", name);
        assert_eq!(
            std::fs::read(&copied).unwrap(),
            std::fs::read(&orig).unwrap(),
            "{} content",
            name
        );
    }

    let link = dst.join("a").join("link");
    let link_md = std::fs::symlink_metadata(&link).unwrap();
    assert!(link_md.file_type().is_symlink());
    assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("one.bin"));

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&src).ok();
    std::fs::remove_dir_all(&dst_parent).ok();
}

/// Scenario: mkdir, stat, rmdir, stat fails with no-such-file.
#[tokio::test]
async fn test_mkdir_rmdir_lifecycle() {
    let dir = scratch_dir("mkdir");
    let (client, server_task) = start_default_session().await;

    let target = path_str(&dir.join(format!("d{}", rand::random::<u32>())));
    client.mkdir(&target, Some(0o755)).await.unwrap();
    let attrs = client.stat(&target).await.unwrap();
    assert!(attrs.is_dir());

    client.rmdir(&target).await.unwrap();
    let err = client.stat(&target).await.unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::NoSuchFile));

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario: hard link to a 999-byte file; lstat on the link reports 999.
#[tokio::test]
async fn test_hardlink_reports_source_size() {
    let dir = scratch_dir("hardlink");
    let (client, server_task) = start_default_session().await;

    let original = dir.join("original.bin");
    std::fs::write(&original, vec![7u8; 999]).unwrap();
    let link = path_str(&dir.join("link.bin"));

    client
        .hardlink(&path_str(&original), &link)
        .await
        .unwrap();
    let attrs = client.lstat(&link).await.unwrap();
    assert_eq!(attrs.size, Some(999));

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario: symlink /bin/sh to a random path; lstat sees a symlink.
#[cfg(unix)]
#[tokio::test]
async fn test_symlink_lstat_reports_link() {
    let dir = scratch_dir("symlink");
    let (client, server_task) = start_default_session().await;

    let link = path_str(&dir.join(format!("sh-{}", rand::random::<u32>())));
    client.symlink("/bin/sh", &link).await.unwrap();

    let attrs = client.lstat(&link).await.unwrap();
    assert!(attrs.is_symlink());
    assert_eq!(client.readlink(&link).await.unwrap(), "/bin/sh");

    // stat follows the link to the real binary.
    let followed = client.stat(&link).await.unwrap();
    assert!(!followed.is_symlink());

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario: 64 concurrent random-offset reads all return correct data,
/// with the server running its inbound frames out of the page allocator.
#[tokio::test]
async fn test_concurrent_random_reads_with_allocator() {
    let dir = scratch_dir("reads");
    let server_config = SftpServerConfig::new().with_allocator(true);
    let (client, server_task) =
        start_session(server_config, SftpClientConfig::default()).await;

    let mut payload = vec![0u8; 8 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);
    let remote = dir.join("big.bin");
    std::fs::write(&remote, &payload).unwrap();

    let file = Arc::new(client.open(&path_str(&remote)).await.unwrap());
    let mut tasks = Vec::new();
    for _ in 0..64 {
        let file = Arc::clone(&file);
        let offset = rand::thread_rng().gen_range(0..payload.len() - 4096) as u64;
        tasks.push(tokio::spawn(async move {
            let data = file.read_at(offset, 4096).await?;
            Ok::<(u64, bytes::Bytes), Error>((offset, data))
        }));
    }
    for task in tasks {
        let (offset, data) = task.await.unwrap().unwrap();
        let expected = &payload[offset as usize..offset as usize + 4096];
        assert_eq!(&data[..], expected, "read at offset {}", offset);
    }

    let file = Arc::try_unwrap(file).ok().expect("no outstanding clones");
    file.close().await.unwrap();
    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// A listing larger than one READDIR batch is drained to EOF exactly once.
#[tokio::test]
async fn test_readdir_spans_batches() {
    let dir = scratch_dir("listing");
    for i in 0..300 {
        std::fs::write(dir.join(format!("f{:03}", i)), b"x").unwrap();
    }

    let (client, server_task) = start_default_session().await;
    let entries = client.read_dir(&path_str(&dir)).await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names.len(), 300);
    assert!(names.contains(&"f000"));
    assert!(names.contains(&"f299"));
    assert!(entries.iter().all(|e| !e.longname.is_empty()));

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// Independent handles on one file stay isolated and close cleanly.
#[tokio::test]
async fn test_multiple_handles_same_file() {
    let dir = scratch_dir("handle");
    let remote = dir.join("f.bin");
    std::fs::write(&remote, b"hello").unwrap();

    let (client, server_task) = start_default_session().await;

    let file = client.open(&path_str(&remote)).await.unwrap();
    let first = file.read_at(0, 5).await.unwrap();
    assert_eq!(&first[..], b"hello");

    let second = client.open(&path_str(&remote)).await.unwrap();
    let data = second.read_at(0, 5).await.unwrap();
    assert_eq!(&data[..], b"hello");
    second.close().await.unwrap();
    file.close().await.unwrap();

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// The walker visits the whole tree lazily and honors skip_current_dir.
#[tokio::test]
async fn test_walker_traversal_and_skip() {
    let dir = scratch_dir("walk");
    std::fs::create_dir_all(dir.join("keep/inner")).unwrap();
    std::fs::create_dir_all(dir.join("skip/inner")).unwrap();
    std::fs::write(dir.join("keep/inner/file.txt"), b"1").unwrap();
    std::fs::write(dir.join("skip/inner/hidden.txt"), b"2").unwrap();

    let (client, server_task) = start_default_session().await;

    let root = path_str(&dir);
    let mut walker = client.walk(&root);
    let mut seen = Vec::new();
    while let Some(entry) = walker.next().await {
        assert!(entry.error.is_none(), "walk error at {}", entry.path);
        if entry.path.ends_with("/skip") {
            walker.skip_current_dir();
        }
        seen.push(entry.path);
    }

    assert!(seen.iter().any(|p| p.ends_with("keep/inner/file.txt")));
    assert!(seen.iter().any(|p| p.ends_with("/skip")));
    assert!(!seen.iter().any(|p| p.contains("hidden")));

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// Wildcards expand against remote listings.
#[tokio::test]
async fn test_glob_expansion() {
    let dir = scratch_dir("glob");
    for name in ["alpha.rs", "beta.rs", "gamma.txt"] {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    let (client, server_task) = start_default_session().await;

    let pattern = format!("{}/*.rs", path_str(&dir));
    let matched = client.glob(&pattern).await.unwrap();
    assert_eq!(matched.len(), 2);
    assert!(matched[0].ends_with("alpha.rs"));
    assert!(matched[1].ends_with("beta.rs"));

    let none = client
        .glob(&format!("{}/*.zip", path_str(&dir)))
        .await
        .unwrap();
    assert!(none.is_empty());

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// posix-rename replaces an existing target; standard v3 RENAME refuses.
#[tokio::test]
async fn test_rename_semantics() {
    let dir = scratch_dir("rename");
    let (client, server_task) = start_default_session().await;

    let a = path_str(&dir.join("a"));
    let b = path_str(&dir.join("b"));
    std::fs::write(&a, b"from").unwrap();
    std::fs::write(&b, b"to").unwrap();

    // The server advertises posix-rename, so this replaces b.
    client.rename(&a, &b).await.unwrap();
    assert_eq!(std::fs::read(&b).unwrap(), b"from");
    assert!(!std::path::Path::new(&a).exists());

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// A read-only server refuses every mutating request.
#[tokio::test]
async fn test_read_only_mode() {
    let dir = scratch_dir("readonly");
    let existing = dir.join("present.txt");
    std::fs::write(&existing, b"data").unwrap();

    let server_config = SftpServerConfig::new().with_read_only(true);
    let (client, server_task) =
        start_session(server_config, SftpClientConfig::default()).await;

    let err = client
        .create(&path_str(&dir.join("new.txt")))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::PermissionDenied));

    let err = client
        .mkdir(&path_str(&dir.join("newdir")), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::PermissionDenied));

    let err = client.remove(&path_str(&existing)).await.unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::PermissionDenied));

    // Reads still work.
    let file = client.open(&path_str(&existing)).await.unwrap();
    assert_eq!(&file.read_at(0, 4).await.unwrap()[..], b"data");
    file.close().await.unwrap();

    client.close().await;
    server_task.await.unwrap().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario: graceful shutdown under load. The session closes while many
/// requests are outstanding; every caller sees success or connection-lost,
/// and the server session still winds down.
#[tokio::test]
async fn test_graceful_shutdown_under_load() {
    let dir = scratch_dir("shutdown");
    let remote = dir.join("big.bin");
    std::fs::write(&remote, vec![1u8; 4 * 1024 * 1024]).unwrap();

    let client_config = SftpClientConfig::new().with_max_inflight(128);
    let (client, server_task) =
        start_session(SftpServerConfig::default(), client_config).await;
    let client = Arc::new(client);

    let file = Arc::new(client.open(&path_str(&remote)).await.unwrap());
    let mut tasks = Vec::new();
    for i in 0..100 {
        let file = Arc::clone(&file);
        tasks.push(tokio::spawn(async move {
            file.read_at((i % 64) * 32 * 1024, 32 * 1024).await
        }));
    }

    // Close with requests still in flight.
    client.close().await;

    let mut successes = 0;
    let mut lost = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(Error::ConnectionLost) | Err(Error::SessionClosed) => lost += 1,
            Err(other) => panic!("unexpected outcome: {}", other),
        }
    }
    assert_eq!(successes + lost, 100);

    // The server observes EOF and finishes draining.
    let _ = server_task.await.unwrap();

    std::fs::remove_dir_all(&dir).ok();
}

/// An unknown packet type in the negotiated range draws STATUS
/// op-unsupported and leaves the session usable.
#[tokio::test]
async fn test_unknown_packet_type_gets_op_unsupported() {
    use sealink_proto::sftp::packet::{self, PacketType};
    use sealink_proto::sftp::wire::{WireReader, WireWriter};
    use tokio::io::AsyncWriteExt;

    let (mut client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (server_in, server_out) = tokio::io::split(server_side);
    let server = SftpServer::with_defaults();
    let server_task = tokio::spawn(async move { server.serve(server_in, server_out).await });

    // Handshake by hand.
    client_side
        .write_all(&packet::encode_init(3))
        .await
        .unwrap();
    let (ptype, body) = packet::read_frame(&mut client_side, 256 * 1024)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(PacketType::from_u8(ptype), Some(PacketType::Version));
    assert_eq!(packet::decode_version_body(&body).unwrap().version, 3);

    // A frame with an unused type tag and a request id.
    let mut w = WireWriter::new();
    w.put_u32(77);
    client_side.write_all(&w.into_frame(99)).await.unwrap();

    let (ptype, body) = packet::read_frame(&mut client_side, 256 * 1024)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(PacketType::from_u8(ptype), Some(PacketType::Status));
    let mut r = WireReader::new(&body);
    assert_eq!(r.read_u32("id").unwrap(), 77);
    assert_eq!(
        r.read_u32("code").unwrap(),
        StatusCode::OpUnsupported as u32
    );

    drop(client_side);
    server_task.await.unwrap().unwrap();
}

/// Any first packet other than INIT terminates the session.
#[tokio::test]
async fn test_non_init_first_packet_terminates_session() {
    use sealink_proto::sftp::wire::WireWriter;
    use tokio::io::AsyncWriteExt;

    let (mut client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (server_in, server_out) = tokio::io::split(server_side);
    let server = SftpServer::with_defaults();
    let server_task = tokio::spawn(async move { server.serve(server_in, server_out).await });

    let mut w = WireWriter::new();
    w.put_u32(1);
    w.put_string("/tmp");
    client_side.write_all(&w.into_frame(17)).await.unwrap(); // STAT before INIT

    let err = server_task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

/// Sequential stream reassembly equals a contiguous read even when the
/// stream is limited to single-chunk windows (no concurrency) vs default.
#[tokio::test]
async fn test_stream_matches_contiguous_read() {
    let dir = scratch_dir("stream");
    let mut payload = vec![0u8; 1024 * 1024 + 777];
    rand::thread_rng().fill_bytes(&mut payload);
    let remote = dir.join("data.bin");
    std::fs::write(&remote, &payload).unwrap();

    for concurrent in [true, false] {
        let client_config = SftpClientConfig::new()
            .with_concurrent_reads(concurrent)
            .with_use_fstat(concurrent);
        let (client, server_task) =
            start_session(SftpServerConfig::default(), client_config).await;

        let file = client.open(&path_str(&remote)).await.unwrap();
        let got = {
            let mut reader = file.reader(0);
            reader.read_to_end().await.unwrap()
        };
        assert!(got == payload, "stream content differs (concurrent={})", concurrent);
        file.close().await.unwrap();

        client.close().await;
        server_task.await.unwrap().unwrap();
    }
    std::fs::remove_dir_all(&dir).ok();
}
