//! Descriptor exhaustion: failed accepts must not stop the listener.
//!
//! Lowers `RLIMIT_NOFILE` for the whole process, so it lives in its own test
//! binary with a single test.

use nix::libc::EMFILE;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use socketlog::client::EchoClient;
use socketlog::config::ServerConfig;
use socketlog::server::LogServer;
use std::fs::File;
use std::net::Ipv4Addr;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpSocket;
use tokio::time::timeout;

/// Open `/dev/null` until the process runs out of descriptors
fn exhaust_descriptors() -> Vec<File> {
    let mut held = Vec::new();
    loop {
        match File::open("/dev/null") {
            Ok(file) => held.push(file),
            Err(e) if e.raw_os_error() == Some(EMFILE) => return held,
            Err(e) => panic!("unexpected error while filling descriptors: {}", e),
        }
        assert!(held.len() < 100_000, "descriptor limit never reached");
    }
}

#[tokio::test]
async fn test_listener_survives_descriptor_exhaustion() {
    let temp_dir = tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.server.bind_address = Ipv4Addr::LOCALHOST;
    config.server.port = 0;
    config.server.reap_interval_ms = 20;
    config.storage.data_file = temp_dir.path().join("aesdsocketdata");
    config.timestamp.enabled = false;

    let server = LogServer::new(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    // Created up front so connecting needs no new descriptor
    let socket = TcpSocket::new_v4().unwrap();

    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
    let in_use = std::fs::read_dir("/proc/self/fd").unwrap().count() as u64;
    setrlimit(Resource::RLIMIT_NOFILE, (in_use + 32).min(hard), hard).unwrap();
    let fillers = exhaust_descriptors();

    // The kernel completes the handshake; the server's accept hits EMFILE
    let mut pending = socket.connect(addr).await.unwrap();
    pending.write_all(b"during\n").await.unwrap();

    let mut echo = [0u8; 7];
    assert!(
        timeout(Duration::from_millis(300), pending.read(&mut echo))
            .await
            .is_err(),
        "connection was served without a free descriptor"
    );

    drop(fillers);
    setrlimit(Resource::RLIMIT_NOFILE, soft, hard).unwrap();

    // The same listener picks the waiting client up once descriptors free up
    timeout(Duration::from_secs(5), pending.read_exact(&mut echo))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echo, b"during\n");

    let mut client = EchoClient::connect(&addr.to_string()).await.unwrap();
    client.send(b"after\n").await.unwrap();
    assert_eq!(
        &client.read_exact_echo(13).await.unwrap()[..],
        b"during\nafter\n"
    );

    client.close().await.unwrap();
    drop(pending);
    assert!(shutdown.trigger());

    let report = timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.aborted, 0);
}
