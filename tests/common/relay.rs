//! Test relay management.
//!
//! Spawns xmpp-relay instances for integration testing.

use std::net::SocketAddr;
use std::process::{Child, Command, ExitStatus};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

pub const BOT: &str = "bot@example.org";

/// A running relay process and its scratch directory.
pub struct TestRelay {
    child: Child,
    port: u16,
    _dir: TempDir,
}

impl TestRelay {
    /// Spawn a relay that connects to `gateway` in plain text and serves HTTP on `port`.
    ///
    /// `extra` is appended to the generated configuration.
    pub fn spawn(port: u16, gateway: SocketAddr, extra: &str) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("config.toml");
        let config_content = format!(
            r#"
listen = "127.0.0.1:{port}"
debug = true
{extra}

[xmpp]
gateway = "{gateway}"
user = "{BOT}"
password = "secret"
no_tls = true
send_notif = ["zed@example.org", "amy@example.org"]

[[xmpp.send_muc]]
room = "ops@conference.example.org"
nick = "alerts"
"#
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_xmpp-relay"))
            .arg(&config_path)
            .spawn()?;

        Ok(Self {
            child,
            port,
            _dir: dir,
        })
    }

    /// Wait until the HTTP server accepts connections.
    pub async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Relay failed to start within 5 seconds")
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Wait for the process to exit on its own. Long enough to cover the
    /// receive retry backoff.
    pub async fn wait_for_exit(&mut self) -> anyhow::Result<ExitStatus> {
        for _ in 0..150 {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Relay did not exit within 15 seconds")
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
