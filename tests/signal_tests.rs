//! Process-level tests: run the server binary and stop it with signals

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use socketlog::client::EchoClient;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn spawn_server(port: u16, data_file: &Path, extra: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_socketlog-server"))
        .arg("--port")
        .arg(port.to_string())
        .arg("--data-file")
        .arg(data_file)
        .args(extra)
        .env("SOCKETLOG_TIMESTAMP__ENABLED", "false")
        .env("RUST_LOG", "socketlog=debug")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start server binary")
}

async fn wait_until_listening(port: u16) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("server never started listening on port {}", port);
}

async fn wait_for_exit(child: &mut Child, limit: Duration) -> ExitStatus {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let _ = child.kill();
    panic!("server did not exit within {:?}", limit);
}

fn send_signal(child: &Child, signal: Signal) {
    kill(Pid::from_raw(child.id() as i32), signal).unwrap();
}

/// Two clients, then SIGINT: the data file is removed and the exit code is 0
#[tokio::test]
async fn test_sigint_after_echo_scenario() {
    let temp_dir = tempdir().unwrap();
    let data_file = temp_dir.path().join("aesdsocketdata");
    let port = free_port();
    let mut child = spawn_server(port, &data_file, &[]);
    wait_until_listening(port).await;

    let address = format!("127.0.0.1:{}", port);
    let mut client_a = EchoClient::connect(&address).await.unwrap();
    client_a.send(b"foo\n").await.unwrap();
    assert_eq!(&client_a.read_exact_echo(4).await.unwrap()[..], b"foo\n");
    client_a.close().await.unwrap();

    let mut client_b = EchoClient::connect(&address).await.unwrap();
    client_b.send(b"bar\n").await.unwrap();
    assert_eq!(&client_b.read_exact_echo(8).await.unwrap()[..], b"foo\nbar\n");
    client_b.close().await.unwrap();

    assert!(data_file.exists());
    send_signal(&child, Signal::SIGINT);

    let status = wait_for_exit(&mut child, Duration::from_secs(10)).await;
    assert!(status.success(), "exit status {:?}", status);
    assert!(!data_file.exists());
}

/// SIGTERM with connected clients: the drain deadline closes them and the
/// process still exits cleanly
#[tokio::test]
async fn test_sigterm_with_connected_clients() {
    let temp_dir = tempdir().unwrap();
    let data_file = temp_dir.path().join("aesdsocketdata");
    let port = free_port();
    let mut child = spawn_server(port, &data_file, &["--drain-timeout", "1"]);
    wait_until_listening(port).await;

    let mut streams = vec![];
    for _ in 0..3 {
        streams.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
    }
    sleep(Duration::from_millis(100)).await;

    send_signal(&child, Signal::SIGTERM);
    // A second signal during the drain changes nothing
    sleep(Duration::from_millis(100)).await;
    send_signal(&child, Signal::SIGTERM);

    let status = wait_for_exit(&mut child, Duration::from_secs(10)).await;
    assert!(status.success(), "exit status {:?}", status);
    assert!(!data_file.exists());

    for mut stream in streams {
        let mut buf = [0u8; 8];
        let read = stream.read(&mut buf).await;
        assert!(matches!(read, Ok(0) | Err(_)));
    }
}

/// A port that is already taken is a startup error
#[tokio::test]
async fn test_bind_failure_exits_nonzero() {
    let temp_dir = tempdir().unwrap();
    let data_file = temp_dir.path().join("aesdsocketdata");
    let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut child = spawn_server(port, &data_file, &[]);
    let status = wait_for_exit(&mut child, Duration::from_secs(10)).await;
    assert_eq!(status.code(), Some(1));
}
