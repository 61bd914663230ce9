//! Report document assembled by one validation run.
//!
//! The report mirrors the run inputs (`regproducer`, the fetched bp.json as
//! `input`), carries derived scalars under `info`, enumerates every accepted
//! resource under `output.<section>.<list>`, and closes with the ordered
//! finding stream plus its per-class severity summary.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::findings::{Class, Finding, Kind};

/// Resolved address annotation attached to an output resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub ip_address: String,
    pub organization: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_versions: Option<Vec<String>>,
}

/// One accepted resource under `output.<section>.<list>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Canonical address (default ports stripped, trailing slash removed).
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<HostRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl ResourceEntry {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// Run metadata attached to the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    /// ISO-like UTC timestamp of report generation.
    pub generated_at: String,
    /// Wall time of the validation, in seconds.
    pub elapsed_time: f64,
}

/// The complete validation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Mirror of the on-chain registration the run was given.
    pub regproducer: Value,
    /// The fetched bp.json document, `null` until fetched.
    pub input: Value,
    /// Derived scalars (`name`, `country_name`, `timezone`, rank fields).
    pub info: Map<String, Value>,
    /// `section -> list -> [resource entries]`.
    pub output: Map<String, Value>,
    /// Ordered finding stream.
    pub messages: Vec<Finding>,
    /// Max severity per class.
    pub message_summary: BTreeMap<Class, Kind>,
    pub meta: ReportMeta,
}

impl Report {
    /// Fresh report shell for a run starting now.
    #[must_use]
    pub fn new(regproducer: Value) -> Self {
        Self {
            regproducer,
            input: Value::Null,
            info: Map::new(),
            output: Map::new(),
            messages: Vec::new(),
            message_summary: BTreeMap::new(),
            meta: ReportMeta {
                generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
                elapsed_time: 0.0,
            },
        }
    }

    /// Append a resource under the slash-separated `section/list` path.
    ///
    /// Returns `false` without touching the document when the path is
    /// malformed or the list already holds an entry with this address (a
    /// probed URL appears at most once per list).
    pub fn add_resource(&mut self, add_to_list: &str, entry: ResourceEntry) -> bool {
        let Some((section, list)) = add_to_list.split_once('/') else {
            return false;
        };
        if section.is_empty() || list.is_empty() {
            return false;
        }

        let section_map = self
            .output
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(section_map) = section_map else {
            return false;
        };
        let list_value = section_map
            .entry(list.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(items) = list_value else {
            return false;
        };

        let duplicate = items
            .iter()
            .any(|item| item.get("address").and_then(Value::as_str) == Some(entry.address.as_str()));
        if duplicate {
            return false;
        }

        match serde_json::to_value(&entry) {
            Ok(value) => {
                items.push(value);
                true
            }
            Err(_) => false,
        }
    }

    /// Entries currently stored under `section/list`, empty if absent.
    #[must_use]
    pub fn resources(&self, add_to_list: &str) -> Vec<&Value> {
        let Some((section, list)) = add_to_list.split_once('/') else {
            return Vec::new();
        };
        self.output
            .get(section)
            .and_then(|s| s.get(list))
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default()
    }

    /// Set a derived scalar, overwriting earlier values.
    pub fn set_info(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.info.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_resource_creates_section_and_list() {
        let mut report = Report::new(Value::Null);
        assert!(report.add_resource("nodes/api_https", ResourceEntry::new("https://api.example.net")));

        let items = report.resources("nodes/api_https");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["address"], "https://api.example.net");
    }

    #[test]
    fn add_resource_rejects_duplicate_address() {
        let mut report = Report::new(Value::Null);
        assert!(report.add_resource("nodes/p2p", ResourceEntry::new("peer.example.net:9876")));
        assert!(!report.add_resource("nodes/p2p", ResourceEntry::new("peer.example.net:9876")));
        assert_eq!(report.resources("nodes/p2p").len(), 1);
    }

    #[test]
    fn add_resource_rejects_malformed_path() {
        let mut report = Report::new(Value::Null);
        assert!(!report.add_resource("nodes", ResourceEntry::new("x")));
        assert!(!report.add_resource("/api", ResourceEntry::new("x")));
        assert!(!report.add_resource("nodes/", ResourceEntry::new("x")));
    }

    #[test]
    fn resource_entry_omits_absent_fields() {
        let entry = ResourceEntry::new("https://example.net");
        let json = serde_json::to_value(&entry).expect("serialize");
        let obj = json.as_object().expect("object");
        assert_eq!(obj.len(), 1, "only address expected: {obj:?}");
    }

    #[test]
    fn host_record_roundtrip() {
        let record = HostRecord {
            ip_address: "203.0.113.5".into(),
            organization: "Example Org".into(),
            country: "DE".into(),
            tls_versions: Some(vec!["TLSv1.3".into()]),
        };
        let json = serde_json::to_string(&record).expect("serialize");
        let back: HostRecord = serde_json::from_str(&json).expect("parse");
        assert_eq!(record, back);
    }
}
