//! Fake stanza gateway.
//!
//! Accepts the relay's connection, answers the auth frame and lets tests
//! exchange JSON frames with the relay.

use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

/// Bound gateway waiting for the relay.
pub struct FakeGateway {
    listener: TcpListener,
}

impl FakeGateway {
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the relay and complete the handshake, binding `jid`.
    pub async fn accept(&self, jid: &str) -> anyhow::Result<GatewayPeer> {
        let mut peer = self.accept_raw().await?;
        peer.send_frame(json!({ "op": "ready", "jid": jid })).await?;
        Ok(peer)
    }

    /// Accept the relay and read its auth frame without answering.
    pub async fn accept_raw(&self) -> anyhow::Result<GatewayPeer> {
        let (socket, _) = timeout(Duration::from_secs(10), self.listener.accept()).await??;
        let (read_half, write_half) = socket.into_split();
        let mut peer = GatewayPeer {
            reader: BufReader::new(read_half),
            writer: write_half,
            auth: Value::Null,
        };
        let auth = peer.recv().await?;
        anyhow::ensure!(auth["op"] == "auth", "expected auth frame, got {auth}");
        peer.auth = auth;
        Ok(peer)
    }
}

/// The relay's side of the wire, as seen by the gateway.
pub struct GatewayPeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Auth frame sent by the relay.
    pub auth: Value,
}

impl GatewayPeer {
    pub async fn send_frame(&mut self, frame: Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&frame)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Deliver a chat message to the relay.
    pub async fn chat(&mut self, from: &str, body: &str) -> anyhow::Result<()> {
        self.send_frame(json!({ "op": "message", "from": from, "type": "chat", "body": body }))
            .await
    }

    /// Receive a single frame.
    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    /// Receive a frame with a timeout, skipping keepalive blank lines.
    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<Value> {
        loop {
            let mut line = String::new();
            let n = timeout(dur, self.reader.read_line(&mut line)).await??;
            anyhow::ensure!(n > 0, "relay closed the connection");
            if line.trim().is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(line.trim_end())?);
        }
    }

    /// Receive `count` frames.
    pub async fn recv_n(&mut self, count: usize) -> anyhow::Result<Vec<Value>> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(self.recv().await?);
        }
        Ok(frames)
    }

    /// Wait until the relay closes its side, collecting what it sent last.
    pub async fn expect_eof(&mut self) -> anyhow::Result<Vec<Value>> {
        let mut frames = Vec::new();
        loop {
            let mut line = String::new();
            let n = timeout(Duration::from_secs(10), self.reader.read_line(&mut line)).await??;
            if n == 0 {
                return Ok(frames);
            }
            if !line.trim().is_empty() {
                frames.push(serde_json::from_str(line.trim_end())?);
            }
        }
    }

    /// Hang up on the relay.
    pub async fn disconnect(mut self) -> anyhow::Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
