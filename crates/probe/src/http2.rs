//! HTTP/2 support detection.
//!
//! Out-of-band check via `curl --http2`: reqwest negotiates a single
//! protocol per connection pool, so asking curl keeps the main probe's
//! connection reuse intact. The verbose output names the negotiated
//! protocol, which is all we need.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::tools::ToolRunner;

const CURL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Http2Probe {
    tools: Arc<dyn ToolRunner>,
}

impl Http2Probe {
    #[must_use]
    pub fn new(tools: Arc<dyn ToolRunner>) -> Self {
        Self { tools }
    }

    /// True when the server negotiates HTTP/2 for `url`.
    pub async fn supports_http2(&self, url: &str) -> bool {
        let args = vec![
            "--http2".to_string(),
            "--max-time".to_string(),
            "3".to_string(),
            "--verbose".to_string(),
            "--silent".to_string(),
            "--output".to_string(),
            "/dev/null".to_string(),
            url.to_string(),
        ];
        match self.tools.run("curl", &args, CURL_TIMEOUT).await {
            Ok(output) => {
                let combined = format!("{}\n{}", output.stdout, output.stderr);
                combined.contains("using HTTP2")
                    || combined.contains("using HTTP/2")
                    || combined.contains("HTTP/2 200")
            }
            Err(e) => {
                debug!(url, error = %e, "http2 detection failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{MockToolRunner, ToolOutput};

    #[tokio::test]
    async fn negotiated_marker_in_stderr_counts() {
        let tools = Arc::new(MockToolRunner::new());
        tools.script(
            "curl",
            ToolOutput {
                stdout: String::new(),
                stderr: "* ALPN: server accepted h2\n* using HTTP2\n< HTTP/2 200".to_string(),
                status_ok: true,
            },
        );
        let probe = Http2Probe::new(tools);
        assert!(probe.supports_http2("https://api.example.net").await);
    }

    #[tokio::test]
    async fn http11_only_is_negative() {
        let tools = Arc::new(MockToolRunner::new());
        tools.script(
            "curl",
            ToolOutput {
                stdout: String::new(),
                stderr: "* using HTTP/1.1\n< HTTP/1.1 200 OK".to_string(),
                status_ok: true,
            },
        );
        let probe = Http2Probe::new(tools);
        assert!(!probe.supports_http2("https://api.example.net").await);
    }

    #[tokio::test]
    async fn tool_failure_is_negative() {
        let probe = Http2Probe::new(Arc::new(MockToolRunner::new()));
        assert!(!probe.supports_http2("https://api.example.net").await);
    }
}
