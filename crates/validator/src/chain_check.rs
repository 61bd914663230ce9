//! On-chain reconciliation.
//!
//! Producers publish bp.json on chain as well; the two copies must agree.
//! Both documents are canonicalized (sorted keys, pretty-printed) before
//! comparison so formatting differences do not count, and a mismatch carries
//! a unified diff for the report reader.

use serde_json::Value;
use similar::TextDiff;

use bpscan_common::findings::{Class, Finding, Kind};
use bpscan_common::report::ResourceEntry;

use crate::Run;

/// Canonical form: serde_json maps are key-sorted, so a pretty re-serialize
/// is already canonical.
pub(crate) fn canonical_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

pub(crate) fn unified_diff(onchain: &str, published: &str) -> String {
    TextDiff::from_lines(onchain, published)
        .unified_diff()
        .header("onchain", "published")
        .to_string()
}

impl Run<'_> {
    pub(crate) fn check_onchain(&mut self, published: &Value) {
        if self.onchain_bpjson_enabled {
            let raw = self.onchain_bpjson.trim().to_string();
            if raw.is_empty() {
                self.log.add(Finding::new(
                    Kind::Crit,
                    Class::Bpjson,
                    "bp.json is not published on chain",
                ));
            } else {
                match serde_json::from_str::<Value>(&raw) {
                    Err(e) => {
                        self.log.add(
                            Finding::new(
                                Kind::Crit,
                                Class::Bpjson,
                                "on-chain bp.json is not valid json",
                            )
                            .with("error", e.to_string()),
                        );
                    }
                    Ok(onchain) => {
                        let onchain_canonical = canonical_json(&onchain);
                        let published_canonical = canonical_json(published);
                        if onchain_canonical == published_canonical {
                            self.log.add(Finding::new(
                                Kind::Ok,
                                Class::Bpjson,
                                "on-chain bp.json matches the published file",
                            ));
                        } else {
                            self.log.add(
                                Finding::new(
                                    Kind::Err,
                                    Class::Bpjson,
                                    "on-chain bp.json differs from the published file",
                                )
                                .with(
                                    "diff",
                                    unified_diff(&onchain_canonical, &published_canonical),
                                ),
                            );
                        }
                    }
                }
            }
        }

        if self.onchain_blacklist_enabled {
            let raw = self.onchain_blacklist.trim().to_string();
            if raw.is_empty() {
                self.log.add(Finding::new(
                    Kind::Crit,
                    Class::Blacklist,
                    "blacklist hash is not published on chain",
                ));
            } else {
                self.log.add(Finding::new(
                    Kind::Ok,
                    Class::Blacklist,
                    "blacklist hash is published on chain",
                ));
                self.report
                    .add_resource("chain/blacklist", ResourceEntry::new(raw));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_form_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": 2}"#).expect("parse");
        let b: Value = serde_json::from_str(r#"{"a": 2, "b": 1}"#).expect("parse");
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn diff_is_empty_for_identical_documents() {
        let doc = canonical_json(&json!({"x": 1}));
        assert!(unified_diff(&doc, &doc).is_empty());
    }

    #[test]
    fn diff_marks_changed_lines() {
        let a = canonical_json(&json!({"producer_account_name": "alice"}));
        let b = canonical_json(&json!({"producer_account_name": "bob"}));
        let diff = unified_diff(&a, &b);
        assert!(diff.contains("-"));
        assert!(diff.contains("alice"));
        assert!(diff.contains("bob"));
    }
}
