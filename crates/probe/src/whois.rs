//! WHOIS lookup with long-lived caching.
//!
//! Registry data changes rarely; results are cached for 14 days per IP.
//! Output parsing is deliberately loose: WHOIS is free text and the engine
//! only wants an organization label and a country.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use bpscan_cache::{CacheStore, CacheTable};

use crate::tools::ToolRunner;

/// WHOIS cache freshness window: 14 days.
pub const WHOIS_TTL_SECS: i64 = 14 * 24 * 3600;

const WHOIS_TOOL_TIMEOUT: Duration = Duration::from_secs(15);

/// Keys commonly carrying an organization name, in preference order.
const ORG_KEYS: &[&str] = &["orgname", "org-name", "organization", "descr", "owner", "netname"];

pub struct WhoisProbe {
    tools: Arc<dyn ToolRunner>,
    cache: Arc<CacheStore>,
}

impl WhoisProbe {
    #[must_use]
    pub fn new(tools: Arc<dyn ToolRunner>, cache: Arc<CacheStore>) -> Self {
        Self { tools, cache }
    }

    /// Parsed WHOIS fields for `ip`. Failures yield an empty map; a failed
    /// lookup is not cached.
    pub async fn lookup(&self, ip: &str) -> BTreeMap<String, String> {
        if let Ok(Some(value)) = self.cache.get_fresh(CacheTable::Whois, ip, WHOIS_TTL_SECS) {
            return value_to_fields(&value);
        }

        let output = match self
            .tools
            .run("whois", &[ip.to_string()], WHOIS_TOOL_TIMEOUT)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                debug!(ip, error = %e, "whois lookup failed");
                return BTreeMap::new();
            }
        };

        let fields = parse_whois(&output.stdout);
        if !fields.is_empty() {
            let value = Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            );
            let _ = self.cache.put(CacheTable::Whois, ip, &value);
        }
        fields
    }

    /// Organization label for `ip`, empty if unknown.
    pub async fn organization(&self, ip: &str) -> String {
        let fields = self.lookup(ip).await;
        org_field(&fields).unwrap_or_default()
    }
}

/// Extract `key: value` lines, lowercasing keys. Comment lines (`%`, `#`)
/// are skipped and only the first occurrence of a key is kept.
#[must_use]
pub fn parse_whois(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        fields.entry(key).or_insert_with(|| value.to_string());
    }
    fields
}

/// Preferred organization field from a parsed map.
#[must_use]
pub fn org_field(fields: &BTreeMap<String, String>) -> Option<String> {
    ORG_KEYS
        .iter()
        .find_map(|key| fields.get(*key).cloned())
}

/// Country field from a parsed map, uppercased.
#[must_use]
pub fn country_field(fields: &BTreeMap<String, String>) -> Option<String> {
    fields.get("country").map(|c| c.to_ascii_uppercase())
}

fn value_to_fields(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{MockToolRunner, ToolOutput};

    const SAMPLE: &str = "\
% This is the RIPE Database query service.
% The objects are in RPSL format.

inetnum:        203.0.113.0 - 203.0.113.255
netname:        EXAMPLE-NET
descr:          Example Hosting GmbH
country:        de
admin-c:        EX123-RIPE
";

    #[test]
    fn parse_skips_comments_and_lowercases_keys() {
        let fields = parse_whois(SAMPLE);
        assert_eq!(fields.get("netname").map(String::as_str), Some("EXAMPLE-NET"));
        assert_eq!(fields.get("country").map(String::as_str), Some("de"));
        assert!(!fields.contains_key("% this is the ripe database query service."));
    }

    #[test]
    fn org_prefers_descr_over_netname() {
        let fields = parse_whois(SAMPLE);
        assert_eq!(org_field(&fields).as_deref(), Some("Example Hosting GmbH"));
    }

    #[test]
    fn country_is_uppercased() {
        let fields = parse_whois(SAMPLE);
        assert_eq!(country_field(&fields).as_deref(), Some("DE"));
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(CacheStore::open(dir.path()).expect("cache"));
        let tools = Arc::new(MockToolRunner::new());
        tools.script("whois", ToolOutput::ok(SAMPLE));

        let probe = WhoisProbe::new(tools.clone(), cache);
        let first = probe.lookup("203.0.113.5").await;
        let second = probe.lookup("203.0.113.5").await;

        assert_eq!(first, second);
        assert_eq!(tools.call_count("whois"), 1);
    }

    #[tokio::test]
    async fn failed_lookup_yields_empty_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(CacheStore::open(dir.path()).expect("cache"));
        let tools = Arc::new(MockToolRunner::new());

        let probe = WhoisProbe::new(tools, cache);
        assert!(probe.lookup("203.0.113.5").await.is_empty());
    }
}
