//! Client for sending records to a socketlog server and reading the echoed log

use crate::config::ClientConfig;
use crate::{Result, SocketLogError};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const READ_CHUNK: usize = 4096;

/// Line-protocol client
pub struct EchoClient {
    config: ClientConfig,
    stream: TcpStream,
}

impl EchoClient {
    /// Connect to `address` with default timeouts
    pub async fn connect(address: &str) -> Result<Self> {
        let config = ClientConfig {
            address: address.to_string(),
            ..Default::default()
        };

        Self::with_config(config).await
    }

    /// Connect with a custom configuration
    pub async fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let stream = timeout(config.timeout(), TcpStream::connect(&config.address))
            .await
            .map_err(|_| SocketLogError::Connection("Connection timeout".to_string()))?
            .map_err(|e| SocketLogError::Connection(format!("Failed to connect: {}", e)))?;
        stream.set_nodelay(true)?;

        Ok(Self { config, stream })
    }

    /// Send raw bytes without waiting for anything back
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send `record` terminated by `\n` and return the echoed log
    pub async fn send_record(&mut self, record: &str) -> Result<Bytes> {
        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record.as_bytes());
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }

        self.send(&line).await?;
        self.read_echo().await
    }

    /// Read an echo of unknown length. The echo is complete once the server
    /// stays silent for the idle timeout or closes the connection.
    pub async fn read_echo(&mut self) -> Result<Bytes> {
        let mut received = BytesMut::new();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let wait = if received.is_empty() {
                self.config.timeout()
            } else {
                self.config.idle_timeout()
            };

            match timeout(wait, self.stream.read(&mut chunk)).await {
                Err(_) if received.is_empty() => {
                    return Err(SocketLogError::Connection(
                        "Timed out waiting for echo".to_string(),
                    ))
                }
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => received.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        Ok(received.freeze())
    }

    /// Read an echo of exactly `len` bytes
    pub async fn read_exact_echo(&mut self, len: usize) -> Result<Bytes> {
        let mut echo = vec![0u8; len];
        timeout(self.config.timeout(), self.stream.read_exact(&mut echo))
            .await
            .map_err(|_| SocketLogError::Connection("Timed out waiting for echo".to_string()))??;
        Ok(Bytes::from(echo))
    }

    /// Close the write side and wait for the server to close the connection
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;

        let mut rest = Vec::new();
        timeout(self.config.timeout(), self.stream.read_to_end(&mut rest))
            .await
            .map_err(|_| SocketLogError::Connection("Server did not close".to_string()))??;
        Ok(())
    }
}
