//! # Finding Stream
//!
//! Append-only stream of classified findings produced by one validation run.
//!
//! Every decisioned step of a validation reports exactly one finding. A
//! finding carries a severity [`Kind`], a topical [`Class`], a human-readable
//! detail line, and an arbitrary context map (the probed URL, measured
//! deltas, hints). Insertion order is preserved so the report reads
//! chronologically; [`FindingLog::prefix`] exists solely for the
//! run-metadata entry that is prepended once the run is complete.
//!
//! ## Severity
//!
//! Ascending severity order: `ok < info < warn < err < crit < skip`.
//! [`FindingLog::summarize`] reduces the stream to a per-class maximum
//! under this order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ════════════════════════════════════════════════════════════════════════════════
// KIND
// ════════════════════════════════════════════════════════════════════════════════

/// Severity label of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// An individual assertion passed.
    Ok,
    /// Informational or advisory.
    Info,
    /// Deviation from best practice, not disqualifying.
    Warn,
    /// Contract violation for the affected sub-area.
    Err,
    /// Systemic failure; the owning step typically returns early.
    Crit,
    /// Not applicable (inactive producer, disabled feature, missing upstream).
    Skip,
}

impl Kind {
    /// Numeric rank under the ascending severity order.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Kind::Ok => 0,
            Kind::Info => 1,
            Kind::Warn => 2,
            Kind::Err => 3,
            Kind::Crit => 4,
            Kind::Skip => 5,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Ok => "ok",
            Kind::Info => "info",
            Kind::Warn => "warn",
            Kind::Err => "err",
            Kind::Crit => "crit",
            Kind::Skip => "skip",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// CLASS
// ════════════════════════════════════════════════════════════════════════════════

/// Topical category of a finding. Closed set; drives the severity summary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Class {
    General,
    Regproducer,
    Chains,
    Org,
    Bpjson,
    Blacklist,
    ApiEndpoint,
    P2pEndpoint,
    History,
    Hyperion,
    Wallet,
    Ipv6,
}

impl Class {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Class::General => "general",
            Class::Regproducer => "regproducer",
            Class::Chains => "chains",
            Class::Org => "org",
            Class::Bpjson => "bpjson",
            Class::Blacklist => "blacklist",
            Class::ApiEndpoint => "api_endpoint",
            Class::P2pEndpoint => "p2p_endpoint",
            Class::History => "history",
            Class::Hyperion => "hyperion",
            Class::Wallet => "wallet",
            Class::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// FINDING
// ════════════════════════════════════════════════════════════════════════════════

/// One entry of the finding stream.
///
/// `kind`, `detail` and `class` are mandatory by construction; the typed API
/// makes an absent field unrepresentable. Additional context (probed URL,
/// measured values, remediation hints) lives in the flattened `context` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: Kind,
    pub detail: String,
    pub class: Class,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl Finding {
    #[must_use]
    pub fn new(kind: Kind, class: Class, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            class,
            context: Map::new(),
        }
    }

    /// Attach a context field. Later writes to the same key win.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// FINDING LOG
// ════════════════════════════════════════════════════════════════════════════════

/// Ordered, append-only finding stream owned by one validation run.
#[derive(Debug, Default, Clone)]
pub struct FindingLog {
    entries: Vec<Finding>,
}

impl FindingLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finding, preserving insertion order.
    pub fn add(&mut self, finding: Finding) {
        self.entries.push(finding);
    }

    /// Prepend a finding. Used once per run for the run-metadata entry.
    pub fn prefix(&mut self, finding: Finding) {
        self.entries.insert(0, finding);
    }

    #[must_use]
    pub fn entries(&self) -> &[Finding] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any finding of `class` has severity `at_least` or above.
    #[must_use]
    pub fn has_at_least(&self, class: Class, at_least: Kind) -> bool {
        self.entries
            .iter()
            .any(|f| f.class == class && f.kind.severity() >= at_least.severity())
    }

    /// Per-class maximum severity over the whole stream.
    ///
    /// Deterministic for a given stream: the map is keyed by [`Class`] in
    /// its declaration order and the reduction is a pure max.
    #[must_use]
    pub fn summarize(&self) -> BTreeMap<Class, Kind> {
        let mut summary: BTreeMap<Class, Kind> = BTreeMap::new();
        for finding in &self.entries {
            summary
                .entry(finding.class)
                .and_modify(|kind| {
                    if finding.kind.severity() > kind.severity() {
                        *kind = finding.kind;
                    }
                })
                .or_insert(finding.kind);
        }
        summary
    }

    /// Consume the log, yielding the ordered entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<Finding> {
        self.entries
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_is_ascending() {
        let ladder = [
            Kind::Ok,
            Kind::Info,
            Kind::Warn,
            Kind::Err,
            Kind::Crit,
            Kind::Skip,
        ];
        for pair in ladder.windows(2) {
            assert!(pair[0].severity() < pair[1].severity());
        }
    }

    #[test]
    fn add_preserves_order() {
        let mut log = FindingLog::new();
        log.add(Finding::new(Kind::Ok, Class::Org, "first"));
        log.add(Finding::new(Kind::Warn, Class::Org, "second"));
        log.add(Finding::new(Kind::Err, Class::Bpjson, "third"));

        let details: Vec<&str> = log.entries().iter().map(|f| f.detail.as_str()).collect();
        assert_eq!(details, vec!["first", "second", "third"]);
    }

    #[test]
    fn prefix_prepends() {
        let mut log = FindingLog::new();
        log.add(Finding::new(Kind::Ok, Class::Org, "body"));
        log.prefix(Finding::new(Kind::Ok, Class::General, "preamble"));

        assert_eq!(log.entries()[0].detail, "preamble");
        assert_eq!(log.entries()[0].class, Class::General);
    }

    #[test]
    fn summarize_takes_class_maximum() {
        let mut log = FindingLog::new();
        log.add(Finding::new(Kind::Ok, Class::Org, "a"));
        log.add(Finding::new(Kind::Err, Class::Org, "b"));
        log.add(Finding::new(Kind::Warn, Class::Org, "c"));
        log.add(Finding::new(Kind::Info, Class::Chains, "d"));

        let summary = log.summarize();
        assert_eq!(summary.get(&Class::Org), Some(&Kind::Err));
        assert_eq!(summary.get(&Class::Chains), Some(&Kind::Info));
        assert_eq!(summary.get(&Class::Wallet), None);
    }

    #[test]
    fn summarize_skip_outranks_crit() {
        let mut log = FindingLog::new();
        log.add(Finding::new(Kind::Crit, Class::Regproducer, "down"));
        log.add(Finding::new(Kind::Skip, Class::Regproducer, "inactive"));

        let summary = log.summarize();
        assert_eq!(summary.get(&Class::Regproducer), Some(&Kind::Skip));
    }

    #[test]
    fn context_fields_flatten_into_json() {
        let finding = Finding::new(Kind::Warn, Class::ApiEndpoint, "slow")
            .with("url", "https://api.example.net")
            .with("elapsed_time", 12.5);
        let json = serde_json::to_value(&finding).expect("serialize");

        assert_eq!(json["kind"], "warn");
        assert_eq!(json["class"], "api_endpoint");
        assert_eq!(json["url"], "https://api.example.net");
        assert_eq!(json["elapsed_time"], 12.5);
    }

    #[test]
    fn has_at_least_filters_by_class() {
        let mut log = FindingLog::new();
        log.add(Finding::new(Kind::Err, Class::Org, "bad"));
        assert!(log.has_at_least(Class::Org, Kind::Err));
        assert!(log.has_at_least(Class::Org, Kind::Warn));
        assert!(!log.has_at_least(Class::Org, Kind::Crit));
        assert!(!log.has_at_least(Class::Bpjson, Kind::Ok));
    }

    #[test]
    fn class_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Class::ApiEndpoint).expect("serialize"),
            Value::String("api_endpoint".to_string())
        );
        assert_eq!(
            serde_json::to_value(Class::P2pEndpoint).expect("serialize"),
            Value::String("p2p_endpoint".to_string())
        );
    }
}
