//! TCP transport standing in for the XRootD/SSI request channel: the
//! connect/accept/send/recv surface this crate's framed wire protocol
//! actually needs (no reconnect backoff here - `JobQuery`'s own retry loop
//! already covers transient failures).

use crate::error::{CoreError, Result};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub bind_addr: SocketAddr,
    pub nodelay: bool,
    pub keepalive_interval: Option<Duration>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5050".parse().unwrap(),
            nodelay: true,
            keepalive_interval: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TcpTransport {
    config: TcpConfig,
    listener: Option<TcpListener>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self { config, listener: None }
    }

    pub async fn bind(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| CoreError::Network(format!("failed to bind TCP listener: {e}")))?;
        tracing::info!(addr = %self.config.bind_addr, "TCP transport listening");
        self.listener = Some(listener);
        Ok(())
    }

    pub async fn accept(&self) -> Result<TcpConnection> {
        let listener = self.listener.as_ref().ok_or_else(|| CoreError::Network("TCP listener not bound".into()))?;
        let (stream, peer_addr) = listener.accept().await.map_err(|e| CoreError::Network(format!("accept failed: {e}")))?;
        self.configure_socket(&stream)?;
        tracing::debug!(%peer_addr, "accepted TCP connection");
        Ok(TcpConnection { stream: Arc::new(RwLock::new(stream)), peer_addr, config: self.config.clone() })
    }

    pub async fn connect(&self, addr: SocketAddr) -> Result<TcpConnection> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| CoreError::Timeout(format!("connect to {addr} timed out")))?
            .map_err(|e| CoreError::Network(format!("connect to {addr} failed: {e}")))?;
        self.configure_socket(&stream)?;
        Ok(TcpConnection { stream: Arc::new(RwLock::new(stream)), peer_addr: addr, config: self.config.clone() })
    }

    fn configure_socket(&self, stream: &TcpStream) -> Result<()> {
        if self.config.nodelay {
            stream.set_nodelay(true).map_err(|e| CoreError::Network(format!("set TCP_NODELAY failed: {e}")))?;
        }
        if let Some(keepalive) = self.config.keepalive_interval {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new().with_time(keepalive).with_interval(keepalive);
            socket.set_tcp_keepalive(&keepalive).map_err(|e| CoreError::Network(format!("set keepalive failed: {e}")))?;
        }
        Ok(())
    }
}

pub struct TcpConnection {
    stream: Arc<RwLock<TcpStream>>,
    peer_addr: SocketAddr,
    config: TcpConfig,
}

impl TcpConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut stream = self.stream.write().await;
        tokio::time::timeout(self.config.write_timeout, stream.write_all(data))
            .await
            .map_err(|_| CoreError::Timeout("write timed out".into()))?
            .map_err(|e| CoreError::Network(format!("send failed: {e}")))?;
        stream.flush().await.map_err(|e| CoreError::Network(format!("flush failed: {e}")))?;
        Ok(())
    }

    pub async fn recv(&self, buf: &mut BytesMut) -> Result<usize> {
        let mut stream = self.stream.write().await;
        tokio::time::timeout(self.config.read_timeout, stream.read_buf(buf))
            .await
            .map_err(|_| CoreError::Timeout("read timed out".into()))?
            .map_err(|e| CoreError::Network(format!("recv failed: {e}")))
    }

    pub async fn recv_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut stream = self.stream.write().await;
        tokio::time::timeout(self.config.read_timeout, stream.read_exact(buf))
            .await
            .map_err(|_| CoreError::Timeout("read timed out".into()))?
            .map_err(|e| CoreError::Network(format!("recv_exact failed: {e}")))?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let mut stream = self.stream.write().await;
        stream.shutdown().await.map_err(|e| CoreError::Network(format!("close failed: {e}")))?;
        Ok(())
    }

    pub async fn is_alive(&self) -> bool {
        self.stream.read().await.peer_addr().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_nodelay() {
        let config = TcpConfig::default();
        assert!(config.nodelay);
    }

    #[tokio::test]
    async fn bind_on_random_port_succeeds() {
        let mut config = TcpConfig::default();
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        let mut transport = TcpTransport::new(config);
        assert!(transport.bind().await.is_ok());
    }

    #[tokio::test]
    async fn connect_and_accept_exchange_bytes() {
        let mut config = TcpConfig::default();
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        let mut listener = TcpTransport::new(config.clone());
        listener.bind().await.unwrap();
        let local_addr = listener.listener.as_ref().unwrap().local_addr().unwrap();

        let dialer = TcpTransport::new(config);
        let (client, server) = tokio::join!(dialer.connect(local_addr), listener.accept());
        let client = client.unwrap();
        let server = server.unwrap();

        client.send(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.recv_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
