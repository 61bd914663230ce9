//! Chain API behavior tests.
//!
//! Run against each endpoint whose `/v1/chain/get_info` answered: chain id
//! and clock sanity, server version catalog lookup, then the fixed sub-test
//! catalog (block one, table rows, verbose errors, ABI serializer, core
//! symbol, disabled plugin surfaces, HTTP/2).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use bpscan_common::findings::{Class, Finding, Kind};
use bpscan_probe::{HttpRequest, RequestOpts, ResponseEnvelope};

use crate::url_check::ExtraOutcome;
use crate::Run;

/// Maximum tolerated head-block lag, seconds.
const MAX_HEAD_BLOCK_LAG_SECS: i64 = 10;

/// Shared envelope for every API sub-test: 10 s timeout, 300 s cache.
pub(crate) fn api_request_opts() -> RequestOpts {
    RequestOpts {
        request_timeout: Duration::from_secs(10),
        cache_timeout_secs: 300,
        cache_fast_fail: false,
        suppress_timeout_message: false,
    }
}

/// Parse an EOSIO chain timestamp (`2026-08-02T11:22:33.500`, UTC implied).
pub(crate) fn parse_chain_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Canonicalize a `server_version_string` for catalog lookup: strip the
/// `-dirty` marker, a `-dd-<hex>` build id, and a trailing `-<word>` tag.
pub(crate) fn normalize_version(raw: &str) -> String {
    let mut version = raw.trim().to_string();
    if let Some(stripped) = version.strip_suffix("-dirty") {
        version = stripped.to_string();
    }
    if let Some(idx) = version.rfind("-dd-") {
        let tail = &version[idx + 4..];
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_hexdigit()) {
            version.truncate(idx);
        }
    }
    if let Some(idx) = version.rfind('-') {
        let tail = &version[idx + 1..];
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_alphabetic()) {
            version.truncate(idx);
        }
    }
    version
}

impl Run<'_> {
    /// The `get_info` gate plus the sub-test catalog. Called by the URL
    /// validator with the parsed `get_info` body.
    pub(crate) async fn api_extra_check(
        &mut self,
        address: &str,
        ssl: bool,
        body: Option<&Value>,
        class: Class,
    ) -> ExtraOutcome {
        let Some(info) = body else {
            self.log.add(
                Finding::new(Kind::Err, class, "get_info returned no body").with("url", address),
            );
            return ExtraOutcome::fail();
        };

        // ── Chain id ──────────────────────────────────────────────────
        match info.get("chain_id").and_then(Value::as_str) {
            None => {
                self.log.add(
                    Finding::new(Kind::Crit, class, "get_info has no chain_id")
                        .with("url", address),
                );
                return ExtraOutcome::fail();
            }
            Some(chain_id) if chain_id != self.chain.chain_id => {
                self.log.add(
                    Finding::new(Kind::Crit, class, "wrong chain id")
                        .with("url", address)
                        .with("expected", self.chain.chain_id.clone())
                        .with("received", chain_id),
                );
                return ExtraOutcome::fail();
            }
            Some(_) => {}
        }

        // ── Clock ─────────────────────────────────────────────────────
        let head_block_time = info
            .get("head_block_time")
            .and_then(Value::as_str)
            .and_then(parse_chain_time);
        match head_block_time {
            None => {
                self.log.add(
                    Finding::new(Kind::Crit, class, "get_info has no usable head_block_time")
                        .with("url", address),
                );
                return ExtraOutcome::fail();
            }
            Some(head) => {
                let delta = Utc::now().signed_duration_since(head).num_seconds();
                if delta > MAX_HEAD_BLOCK_LAG_SECS {
                    self.log.add(
                        Finding::new(Kind::Crit, class, "last block is not up-to-date")
                            .with("url", address)
                            .with("delta_time", delta),
                    );
                    return ExtraOutcome::fail();
                }
            }
        }

        // ── Server version ────────────────────────────────────────────
        let mut outcome = ExtraOutcome::pass();
        let raw_version = info
            .get("server_version_string")
            .and_then(Value::as_str)
            .unwrap_or("");
        let canonical = normalize_version(raw_version);
        match self.versions.lookup(&canonical) {
            None => {
                self.log.add(
                    Finding::new(Kind::Warn, class, "unknown server version")
                        .with("url", address)
                        .with("server_version", raw_version),
                );
            }
            Some(entry) => {
                outcome
                    .info
                    .insert("server_version".to_string(), Value::String(entry.name.clone()));
                if entry.api_current {
                    self.log.add(
                        Finding::new(Kind::Ok, class, "server version is current")
                            .with("url", address)
                            .with("server_version", entry.name.clone()),
                    );
                } else {
                    self.log.add(
                        Finding::new(Kind::Warn, class, "server version is out of date")
                            .with("url", address)
                            .with("server_version", entry.name.clone()),
                    );
                }
            }
        }

        // ── Sub-test catalog ──────────────────────────────────────────
        self.api_block_one(address, class).await;
        self.api_table_rows(address, class).await;
        self.api_error_message(address, class).await;
        self.api_abi_serializer(address, class).await;
        self.api_system_symbol(address, class).await;
        self.api_disabled_plugins(address, class).await;

        if ssl {
            if self.v.http2.supports_http2(address).await {
                outcome.list_rename = Some(("api_https", "api_https2"));
            } else {
                self.log.add(
                    Finding::new(Kind::Warn, class, "http/2 is not supported")
                        .with("url", address),
                );
            }
        }

        outcome
    }

    async fn api_post(&mut self, address: &str, path: &str, body: Value, class: Class) -> ResponseEnvelope {
        let request = HttpRequest::post_json(format!("{address}{path}"), &body);
        self.v
            .http
            .request(&request, &api_request_opts(), &mut self.log, class)
            .await
    }

    async fn api_block_one(&mut self, address: &str, class: Class) {
        let envelope = self
            .api_post(
                address,
                "/v1/chain/get_block",
                json!({"block_num_or_id": "1"}),
                class,
            )
            .await;
        if envelope.ok() {
            self.log.add(
                Finding::new(Kind::Ok, class, "block one is available").with("url", address),
            );
        } else {
            self.log.add(
                Finding::new(Kind::Err, class, "could not fetch block one")
                    .with("url", address)
                    .with("response_code", envelope.code),
            );
        }
    }

    async fn api_table_rows(&mut self, address: &str, class: Class) {
        let envelope = self
            .api_post(
                address,
                "/v1/chain/get_table_rows",
                json!({"json": true, "code": "eosio", "scope": "eosio", "table": "global", "limit": 1}),
                class,
            )
            .await;
        if envelope.ok() {
            self.log
                .add(Finding::new(Kind::Ok, class, "table rows are queryable").with("url", address));
        } else {
            self.log.add(
                Finding::new(Kind::Err, class, "table rows query is blocked")
                    .with("url", address)
                    .with("response_code", envelope.code),
            );
        }
    }

    async fn api_error_message(&mut self, address: &str, class: Class) {
        let envelope = self
            .api_post(address, "/v1/chain/validate_error_message", json!({}), class)
            .await;
        let details_present = serde_json::from_slice::<Value>(&envelope.body)
            .ok()
            .and_then(|body| {
                body.get("error")
                    .and_then(|e| e.get("details"))
                    .and_then(Value::as_array)
                    .map(|details| !details.is_empty())
            })
            .unwrap_or(false);
        if details_present {
            self.log.add(
                Finding::new(Kind::Ok, class, "verbose http errors are enabled")
                    .with("url", address),
            );
        } else {
            self.log.add(
                Finding::new(Kind::Err, class, "verbose http errors are disabled")
                    .with("url", address)
                    .with("hint", "verbose-http-errors"),
            );
        }
    }

    async fn api_abi_serializer(&mut self, address: &str, class: Class) {
        let envelope = self
            .api_post(
                address,
                "/v1/chain/get_block",
                json!({"block_num_or_id": self.chain.test_big_block}),
                class,
            )
            .await;
        let transactions = serde_json::from_slice::<Value>(&envelope.body)
            .ok()
            .and_then(|body| {
                body.get("transactions")
                    .and_then(Value::as_array)
                    .map(|t| t.len())
            });
        let expected = self.chain.big_block_transactions;
        match transactions {
            Some(count) if envelope.ok() && count == expected => {
                self.log.add(
                    Finding::new(Kind::Ok, class, "large block decodes fully")
                        .with("url", address),
                );
            }
            received => {
                self.log.add(
                    Finding::new(Kind::Err, class, "large block does not decode fully")
                        .with("url", address)
                        .with("expected", expected)
                        .with("received", received.map_or(Value::Null, |c| c.into()))
                        .with("hint", "abi-serializer-max-time-ms"),
                );
            }
        }
    }

    async fn api_system_symbol(&mut self, address: &str, class: Class) {
        let envelope = self
            .api_post(
                address,
                "/v1/chain/get_currency_balance",
                json!({
                    "account": self.chain.test_account,
                    "code": "eosio.token",
                    "symbol": self.chain.core_symbol,
                }),
                class,
            )
            .await;
        let balances = serde_json::from_slice::<Value>(&envelope.body)
            .ok()
            .and_then(|body| body.as_array().map(|a| !a.is_empty()))
            .unwrap_or(false);
        if envelope.ok() && balances {
            self.log.add(
                Finding::new(Kind::Ok, class, "core symbol is queryable").with("url", address),
            );
        } else {
            self.log.add(
                Finding::new(Kind::Err, class, "core symbol query returned nothing")
                    .with("url", address)
                    .with("symbol", self.chain.core_symbol.clone()),
            );
        }
    }

    /// Management plugin surfaces must not answer on a public endpoint. A
    /// redirect away from the endpoint is tolerated.
    async fn api_disabled_plugins(&mut self, address: &str, class: Class) {
        for (plugin, path) in [
            ("producer_api", "/v1/producer/get_integrity_hash"),
            ("net_api", "/v1/net/connections"),
            ("db_size_api", "/v1/db_size/get"),
        ] {
            let url = format!("{address}{path}");
            let request = HttpRequest::get(&url);
            let opts = RequestOpts {
                suppress_timeout_message: true,
                ..api_request_opts()
            };
            let envelope = self
                .v
                .http
                .request(&request, &opts, &mut self.log, class)
                .await;
            let answered_here = envelope.ok() && envelope.final_url == url;
            if answered_here {
                self.log.add(
                    Finding::new(Kind::Err, class, "management plugin is exposed")
                        .with("url", address)
                        .with("plugin", plugin),
                );
            } else {
                self.log.add(
                    Finding::new(Kind::Ok, class, "management plugin is not exposed")
                        .with("url", address)
                        .with("plugin", plugin),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dirty_marker() {
        assert_eq!(normalize_version("v2.0.13-dirty"), "v2.0.13");
    }

    #[test]
    fn normalize_strips_dd_build_id() {
        assert_eq!(normalize_version("v3.1.0-dd-9f2a3b"), "v3.1.0");
    }

    #[test]
    fn normalize_strips_trailing_word_tag() {
        assert_eq!(normalize_version("v2.1.0-rodeos"), "v2.1.0");
        // Mixed alphanumeric tags are part of the version proper.
        assert_eq!(normalize_version("v1.8.0-rc1"), "v1.8.0-rc1");
    }

    #[test]
    fn normalize_leaves_clean_versions_alone() {
        assert_eq!(normalize_version("v5.0.3"), "v5.0.3");
        assert_eq!(normalize_version("  v5.0.3 "), "v5.0.3");
    }

    #[test]
    fn chain_time_parses_with_and_without_millis() {
        assert!(parse_chain_time("2026-08-02T11:22:33.500").is_some());
        assert!(parse_chain_time("2026-08-02T11:22:33").is_some());
        assert!(parse_chain_time("not a time").is_none());
    }
}
