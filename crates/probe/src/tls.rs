//! TLS cipher enumeration via the external scan tool.
//!
//! `nmap --script ssl-enum-ciphers` reports the protocol versions a server
//! actually negotiates, which the validator compares against the modern set.
//! Scans are expensive and noisy for the target, so results are cached for
//! 24 hours per `(url, ip, port)` and every real invocation is followed by a
//! 20 second cooldown held under a global gate — concurrent validators on
//! the host serialize their scans through it.

use std::sync::Arc;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use bpscan_cache::{fingerprint_hex, CacheStore, CacheTable};

use crate::tools::{ToolError, ToolRunner};

/// TLS scan cache freshness window: 24 hours.
pub const TLS_CACHE_TTL_SECS: i64 = 24 * 3600;

/// Protocol versions that do not earn a warning.
pub const MODERN_TLS_VERSIONS: &[&str] = &["TLSv1.2", "TLSv1.3"];

const SCAN_TOOL_TIMEOUT: Duration = Duration::from_secs(180);
const DEFAULT_SCAN_COOLDOWN: Duration = Duration::from_secs(20);

pub struct TlsProbe {
    tools: Arc<dyn ToolRunner>,
    cache: Arc<CacheStore>,
    cooldown: Duration,
    gate: Arc<Mutex<()>>,
}

impl TlsProbe {
    #[must_use]
    pub fn new(tools: Arc<dyn ToolRunner>, cache: Arc<CacheStore>) -> Self {
        Self {
            tools,
            cache,
            cooldown: DEFAULT_SCAN_COOLDOWN,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Override the post-scan cooldown (tests use zero).
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Enabled TLS/SSL protocol labels for `(ip, port)`, cached per
    /// `(url, ip, port)`.
    pub async fn enabled_versions(
        &self,
        url: &str,
        ip: &str,
        port: u16,
    ) -> Result<Vec<String>, ToolError> {
        let port_string = port.to_string();
        let key = fingerprint_hex(&[url, ip, &port_string]);

        if let Ok(Some(value)) = self
            .cache
            .get_fresh(CacheTable::Tls, &key, TLS_CACHE_TTL_SECS)
        {
            debug!(url, ip, port, "tls scan cache hit");
            return Ok(value_to_versions(&value));
        }

        // One scan at a time across the whole process, cooldown included.
        let _guard = self.gate.lock().await;
        let args = vec![
            "-oX".to_string(),
            "-".to_string(),
            "--script".to_string(),
            "ssl-enum-ciphers".to_string(),
            "-p".to_string(),
            port_string,
            ip.to_string(),
        ];
        let output = self.tools.run("nmap", &args, SCAN_TOOL_TIMEOUT).await?;
        let versions = parse_scan_xml(&output.stdout);

        let value = Value::Array(versions.iter().cloned().map(Value::String).collect());
        let _ = self.cache.put(CacheTable::Tls, &key, &value);

        tokio::time::sleep(self.cooldown).await;
        Ok(versions)
    }
}

/// Extract protocol labels from the scan's XML output. Protocol entries are
/// `<table key="TLSv1.2">` elements; nested tables (`ciphers`,
/// `compressors`) are ignored.
#[must_use]
pub fn parse_scan_xml(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    let mut versions: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() != b"table" {
                    continue;
                }
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() != b"key" {
                        continue;
                    }
                    if let Ok(value) = attr.unescape_value() {
                        let label = value.into_owned();
                        if (label.starts_with("TLSv") || label.starts_with("SSLv"))
                            && !versions.contains(&label)
                        {
                            versions.push(label);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    versions
}

fn value_to_versions(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{MockToolRunner, ToolOutput};

    const SCAN_XML: &str = r#"<?xml version="1.0"?>
<nmaprun>
  <host>
    <ports>
      <port protocol="tcp" portid="443">
        <script id="ssl-enum-ciphers" output="...">
          <table key="TLSv1.0">
            <table key="ciphers">
              <table><elem key="name">TLS_RSA_WITH_AES_128_CBC_SHA</elem></table>
            </table>
            <elem key="cipher preference">server</elem>
          </table>
          <table key="TLSv1.2">
            <table key="ciphers">
              <table><elem key="name">TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384</elem></table>
            </table>
          </table>
        </script>
      </port>
    </ports>
  </host>
</nmaprun>"#;

    #[test]
    fn parse_extracts_protocol_tables_only() {
        let versions = parse_scan_xml(SCAN_XML);
        assert_eq!(versions, vec!["TLSv1.0".to_string(), "TLSv1.2".to_string()]);
    }

    #[test]
    fn parse_tolerates_garbage() {
        assert!(parse_scan_xml("not xml at all").is_empty());
        assert!(parse_scan_xml("").is_empty());
    }

    #[tokio::test]
    async fn scan_result_is_cached_per_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(CacheStore::open(dir.path()).expect("cache"));
        let tools = Arc::new(MockToolRunner::new());
        tools.script("nmap", ToolOutput::ok(SCAN_XML));

        let probe = TlsProbe::new(tools.clone(), cache).with_cooldown(Duration::ZERO);
        let first = probe
            .enabled_versions("https://api.example.net", "93.184.216.34", 443)
            .await
            .expect("scan");
        let second = probe
            .enabled_versions("https://api.example.net", "93.184.216.34", 443)
            .await
            .expect("cached");

        assert_eq!(first, second);
        assert_eq!(tools.call_count("nmap"), 1);
    }

    #[tokio::test]
    async fn different_port_triggers_new_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(CacheStore::open(dir.path()).expect("cache"));
        let tools = Arc::new(MockToolRunner::new());
        tools.script("nmap", ToolOutput::ok(SCAN_XML));

        let probe = TlsProbe::new(tools.clone(), cache).with_cooldown(Duration::ZERO);
        probe
            .enabled_versions("https://api.example.net", "93.184.216.34", 443)
            .await
            .expect("scan");
        probe
            .enabled_versions("https://api.example.net", "93.184.216.34", 8443)
            .await
            .expect("scan");
        assert_eq!(tools.call_count("nmap"), 2);
    }
}
