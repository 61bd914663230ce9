//! P2P peer probe: socket liveness plus block-sync speed.
//!
//! The socket check connects with a 5 second timeout and then peeks the
//! stream: a peer that immediately sends data or closes the connection has
//! rejected us. The speed test shells out to `p2ptest`, which syncs a small
//! block range and reports blocks per second as JSON. A settle delay sits
//! between the two so the speed test does not race the socket teardown.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::tools::{ToolError, ToolRunner};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PEEK_WINDOW: Duration = Duration::from_millis(500);
const SPEED_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SETTLE: Duration = Duration::from_secs(10);

/// Outcome of the raw socket check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCheck {
    /// Connected; the peer kept the connection quiet.
    Open,
    /// Connected but the peer closed or pushed data straight away.
    Dropped(String),
    /// Could not connect within the timeout.
    ConnectFailed(String),
}

/// Parsed `p2ptest` output.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeedTestResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub error_detail: String,
}

pub struct P2pProbe {
    tools: Arc<dyn ToolRunner>,
    settle: Duration,
}

impl P2pProbe {
    #[must_use]
    pub fn new(tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            tools,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Override the settle delay between socket check and speed test.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// TCP connect followed by a short nonblocking peek.
    pub async fn socket_check(&self, host: &str, port: u16) -> SocketCheck {
        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
            Err(_) => return SocketCheck::ConnectFailed("connect timed out".to_string()),
            Ok(Err(e)) => return SocketCheck::ConnectFailed(e.to_string()),
            Ok(Ok(stream)) => stream,
        };

        let mut buf = [0u8; 32];
        match timeout(PEEK_WINDOW, stream.peek(&mut buf)).await {
            // Nothing readable within the window: the peer is holding the
            // connection open and waiting for a handshake. Healthy.
            Err(_) => SocketCheck::Open,
            Ok(Ok(0)) => SocketCheck::Dropped("peer closed the connection".to_string()),
            Ok(Ok(_)) => SocketCheck::Dropped("peer sent unsolicited data".to_string()),
            Ok(Err(e)) => SocketCheck::Dropped(e.to_string()),
        }
    }

    /// Run the external block-sync speed test after the settle delay.
    pub async fn speed_test(
        &self,
        chain_api_url: &str,
        host: &str,
        port: u16,
    ) -> Result<SpeedTestResult, ToolError> {
        tokio::time::sleep(self.settle).await;

        let args = vec![
            "-a".to_string(),
            chain_api_url.to_string(),
            "-h".to_string(),
            host.to_string(),
            "-p".to_string(),
            port.to_string(),
            "-b".to_string(),
            "10".to_string(),
        ];
        let output = self.tools.run("p2ptest", &args, SPEED_TOOL_TIMEOUT).await?;
        match serde_json::from_str::<SpeedTestResult>(&output.stdout) {
            Ok(result) => Ok(result),
            Err(e) => {
                debug!(host, port, error = %e, "p2ptest output was not json");
                Ok(SpeedTestResult {
                    status: "error".to_string(),
                    speed: 0.0,
                    error_detail: format!("unparseable tool output: {e}"),
                })
            }
        }
    }
}
