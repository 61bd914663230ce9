//! Optional API feature suites: history v1, hyperion v2, wallet.
//!
//! Each suite is its own URL probe (own class, own output list) whose main
//! request proves the feature exists; the extra check then exercises the
//! rest of the feature surface. The chain profile decides which suites run.

use chrono::Utc;
use serde_json::{json, Value};

use bpscan_common::config::ContentTypeRule;
use bpscan_common::findings::{Class, Finding, Kind};
use bpscan_probe::HttpRequest;

use crate::api::{api_request_opts, parse_chain_time};
use crate::url_check::{ExtraCheck, ExtraOutcome, SslPolicy, UrlOptions};
use crate::Run;

/// `get_actions` must return this full window.
const ACTIONS_WINDOW: usize = 100;

/// Maximum age of the newest action before history counts as lagging.
const MAX_HISTORY_LAG_SECS: i64 = 2 * 3600;

/// Maximum age of the newest hyperion action.
const MAX_HYPERION_LAG_SECS: i64 = 5 * 60;

/// Hyperion health features that must be enabled.
const HYPERION_FEATURES_ON: &[&str] = &[
    "tables/proposals",
    "tables/accounts",
    "tables/voters",
    "index_deltas",
    "index_transfer_memo",
    "index_all_deltas",
];

/// Hyperion health features that must be disabled.
const HYPERION_FEATURES_OFF: &[&str] = &[
    "failed_trx",
    "deferred_trx",
    "resource_limits",
    "resource_usage",
];

fn suite_list(prefix: &str, ssl: bool) -> String {
    if ssl {
        format!("nodes/{prefix}_https")
    } else {
        format!("nodes/{prefix}_http")
    }
}

fn ssl_policy(ssl: bool) -> SslPolicy {
    if ssl {
        SslPolicy::On
    } else {
        SslPolicy::Off
    }
}

impl Run<'_> {
    // ════════════════════════════════════════════════════════════════════
    // SUITE LAUNCHERS
    // ════════════════════════════════════════════════════════════════════

    pub(crate) async fn check_history_suite(
        &mut self,
        url: &str,
        ssl: bool,
        node_type: &str,
        location: Option<Value>,
    ) {
        let mut opts = UrlOptions::new(Class::History)
            .ssl(ssl_policy(ssl))
            .content_type(ContentTypeRule::Json)
            .url_ext("/v1/history/get_transaction")
            .post(json!({"id": self.chain.test_transaction}))
            .failure_code(Kind::Err)
            .dupe(Kind::Info)
            .cache(300)
            .extra_check(ExtraCheck::History)
            .add_to_list(&suite_list("history", ssl))
            .node_type(node_type);
        if let Some(location) = location {
            opts = opts.location(location);
        }
        self.check_url(url, opts).await;
    }

    pub(crate) async fn check_hyperion_suite(
        &mut self,
        url: &str,
        ssl: bool,
        node_type: &str,
        location: Option<Value>,
    ) {
        let mut opts = UrlOptions::new(Class::Hyperion)
            .ssl(ssl_policy(ssl))
            .content_type(ContentTypeRule::Json)
            .url_ext("/v2/health")
            .failure_code(Kind::Err)
            .dupe(Kind::Info)
            .cache(300)
            .extra_check(ExtraCheck::Hyperion)
            .add_to_list(&suite_list("hyperion", ssl))
            .node_type(node_type);
        if let Some(location) = location {
            opts = opts.location(location);
        }
        self.check_url(url, opts).await;
    }

    pub(crate) async fn check_wallet_suite(
        &mut self,
        url: &str,
        ssl: bool,
        node_type: &str,
        location: Option<Value>,
    ) {
        let mut opts = UrlOptions::new(Class::Wallet)
            .ssl(ssl_policy(ssl))
            .content_type(ContentTypeRule::Json)
            .url_ext("/v1/chain/get_accounts_by_authorizers")
            .post(json!({"accounts": [self.chain.test_account]}))
            .failure_code(Kind::Err)
            .dupe(Kind::Info)
            .cache(300)
            .extra_check(ExtraCheck::Wallet)
            .add_to_list(&suite_list("wallet", ssl))
            .node_type(node_type);
        if let Some(location) = location {
            opts = opts.location(location);
        }
        self.check_url(url, opts).await;
    }

    // ════════════════════════════════════════════════════════════════════
    // HISTORY V1
    // ════════════════════════════════════════════════════════════════════

    pub(crate) async fn history_extra_check(&mut self, address: &str, class: Class) -> ExtraOutcome {
        self.log.add(
            Finding::new(Kind::Ok, class, "test transaction found in history")
                .with("url", address),
        );

        let mut passed = true;

        // ── get_actions ───────────────────────────────────────────────
        let request = HttpRequest::post_json(
            format!("{address}/v1/history/get_actions"),
            &json!({"pos": -1, "offset": -100, "account_name": "eosio.token"}),
        );
        let envelope = self
            .v
            .http
            .request(&request, &api_request_opts(), &mut self.log, class)
            .await;
        if !envelope.ok() {
            self.log.add(
                Finding::new(Kind::Err, class, "get_actions is not available")
                    .with("url", address)
                    .with("response_code", envelope.code),
            );
            passed = false;
        } else {
            let body = serde_json::from_slice::<Value>(&envelope.body).unwrap_or(Value::Null);
            let actions = body
                .get("actions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            if actions.len() != ACTIONS_WINDOW {
                self.log.add(
                    Finding::new(Kind::Err, class, "get_actions did not return a full window")
                        .with("url", address)
                        .with("expected", ACTIONS_WINDOW)
                        .with("received", actions.len()),
                );
                passed = false;
            }
            if body.get("last_irreversible_block").is_none() {
                self.log.add(
                    Finding::new(Kind::Err, class, "get_actions has no last_irreversible_block")
                        .with("url", address),
                );
                passed = false;
            }

            // The timestamps are zero-padded ISO strings, so the newest one
            // is simply the lexicographic maximum.
            let newest = actions
                .iter()
                .filter_map(|a| a.get("block_time").and_then(Value::as_str))
                .max()
                .unwrap_or("");
            match parse_chain_time(newest) {
                Some(newest_time) => {
                    let lag = Utc::now().signed_duration_since(newest_time).num_seconds();
                    if lag > MAX_HISTORY_LAG_SECS {
                        self.log.add(
                            Finding::new(Kind::Err, class, "history is lagging")
                                .with("url", address)
                                .with("last_action_time", newest),
                        );
                        passed = false;
                    } else {
                        self.log.add(
                            Finding::new(Kind::Ok, class, "history is fresh").with("url", address),
                        );
                    }
                }
                None => {
                    self.log.add(
                        Finding::new(Kind::Err, class, "get_actions returned no usable block_time")
                            .with("url", address),
                    );
                    passed = false;
                }
            }
        }

        // ── get_key_accounts ──────────────────────────────────────────
        if !self.key_accounts_non_empty(address, "/v1/history/get_key_accounts", class).await {
            passed = false;
        }

        if !passed {
            return ExtraOutcome::fail();
        }
        let mut outcome = ExtraOutcome::pass();
        outcome.info.insert(
            "history_type".to_string(),
            Value::String("traditional".to_string()),
        );
        outcome.list_rename = Some(("history_", "history_traditional_"));
        outcome
    }

    async fn key_accounts_non_empty(&mut self, address: &str, path: &str, class: Class) -> bool {
        let request = HttpRequest::post_json(
            format!("{address}{path}"),
            &json!({"public_key": self.chain.test_public_key}),
        );
        let envelope = self
            .v
            .http
            .request(&request, &api_request_opts(), &mut self.log, class)
            .await;
        let names = serde_json::from_slice::<Value>(&envelope.body)
            .ok()
            .and_then(|body| {
                body.get("account_names")
                    .and_then(Value::as_array)
                    .map(|names| !names.is_empty())
            })
            .unwrap_or(false);
        if envelope.ok() && names {
            self.log.add(
                Finding::new(Kind::Ok, class, "key accounts are queryable").with("url", address),
            );
            true
        } else {
            self.log.add(
                Finding::new(Kind::Err, class, "key accounts query returned nothing")
                    .with("url", address),
            );
            false
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // HYPERION V2
    // ════════════════════════════════════════════════════════════════════

    pub(crate) async fn hyperion_extra_check(
        &mut self,
        address: &str,
        body: Option<&Value>,
        class: Class,
    ) -> ExtraOutcome {
        let health = body.cloned().unwrap_or(Value::Null);
        let mut passed = true;

        if health.get("version").and_then(Value::as_str).is_none() {
            self.log.add(
                Finding::new(Kind::Err, class, "health reports no version").with("url", address),
            );
            passed = false;
        }

        match health.get("host").and_then(Value::as_str) {
            Some(host) if address.contains(host) => {}
            Some(host) => {
                self.log.add(
                    Finding::new(Kind::Err, class, "health host does not match the endpoint")
                        .with("url", address)
                        .with("host", host),
                );
                passed = false;
            }
            None => {
                self.log.add(
                    Finding::new(Kind::Err, class, "health reports no host").with("url", address),
                );
                passed = false;
            }
        }

        match health.get("query_time_ms").and_then(Value::as_f64) {
            Some(query_time) if query_time < 400.0 => {}
            Some(query_time) => {
                self.log.add(
                    Finding::new(Kind::Err, class, "health query time is too high")
                        .with("url", address)
                        .with("query_time_ms", query_time),
                );
                passed = false;
            }
            None => {
                self.log.add(
                    Finding::new(Kind::Err, class, "health reports no query time")
                        .with("url", address),
                );
                passed = false;
            }
        }

        // ── Features ──────────────────────────────────────────────────
        let features = health.get("features").cloned().unwrap_or(Value::Null);
        for feature in HYPERION_FEATURES_ON {
            if feature_flag(&features, feature) != Some(true) {
                self.log.add(
                    Finding::new(Kind::Err, class, "required hyperion feature is disabled")
                        .with("url", address)
                        .with("feature", *feature),
                );
                passed = false;
            }
        }
        for feature in HYPERION_FEATURES_OFF {
            if feature_flag(&features, feature) == Some(true) {
                self.log.add(
                    Finding::new(Kind::Err, class, "hyperion feature should be disabled")
                        .with("url", address)
                        .with("feature", *feature),
                );
                passed = false;
            }
        }

        // ── Services ──────────────────────────────────────────────────
        let services = health
            .get("health")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for service in &services {
            let name = service
                .get("service")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let status = service.get("status").and_then(Value::as_str).unwrap_or("");
            if status != "OK" {
                self.log.add(
                    Finding::new(Kind::Err, class, "hyperion service is not healthy")
                        .with("url", address)
                        .with("service", name)
                        .with("status", status),
                );
                passed = false;
            }
            let data = service.get("service_data").cloned().unwrap_or(Value::Null);
            match name {
                "Elasticsearch" => {
                    if data.get("active_shards").and_then(Value::as_str) != Some("100.0%") {
                        self.log.add(
                            Finding::new(Kind::Err, class, "elasticsearch shards are not all active")
                                .with("url", address),
                        );
                        passed = false;
                    }
                    let last = data.get("last_indexed_block");
                    let total = data.get("total_indexed_blocks");
                    if last != total || last.is_none() {
                        self.log.add(
                            Finding::new(Kind::Err, class, "elasticsearch indexing is behind")
                                .with("url", address),
                        );
                        passed = false;
                    }
                }
                "NodeosRPC" => {
                    let offset = data
                        .get("time_offset")
                        .and_then(Value::as_f64)
                        .unwrap_or(f64::MAX);
                    if !(-500.0..=2000.0).contains(&offset) {
                        self.log.add(
                            Finding::new(Kind::Err, class, "nodeos rpc time offset out of range")
                                .with("url", address)
                                .with("time_offset", offset),
                        );
                        passed = false;
                    }
                }
                _ => {}
            }
        }

        // ── Behavior probes ───────────────────────────────────────────
        let tx_url = format!(
            "{address}/v2/history/get_transaction?id={}",
            self.chain.test_transaction
        );
        let envelope = self
            .v
            .http
            .request(
                &HttpRequest::get(&tx_url),
                &api_request_opts(),
                &mut self.log,
                class,
            )
            .await;
        if envelope.ok() {
            self.log.add(
                Finding::new(Kind::Ok, class, "hyperion transaction lookup works")
                    .with("url", address),
            );
        } else {
            self.log.add(
                Finding::new(Kind::Err, class, "hyperion transaction lookup failed")
                    .with("url", address)
                    .with("response_code", envelope.code),
            );
            passed = false;
        }

        let actions_url = format!("{address}/v2/history/get_actions?limit=1");
        let envelope = self
            .v
            .http
            .request(
                &HttpRequest::get(&actions_url),
                &api_request_opts(),
                &mut self.log,
                class,
            )
            .await;
        let newest = serde_json::from_slice::<Value>(&envelope.body)
            .ok()
            .and_then(|body| {
                body.get("actions")
                    .and_then(Value::as_array)
                    .and_then(|actions| actions.first().cloned())
            })
            .and_then(|action| {
                action
                    .get("@timestamp")
                    .and_then(Value::as_str)
                    .and_then(parse_chain_time)
            });
        match newest {
            Some(newest_time) if envelope.ok() => {
                let lag = Utc::now().signed_duration_since(newest_time).num_seconds();
                if lag > MAX_HYPERION_LAG_SECS {
                    self.log.add(
                        Finding::new(Kind::Err, class, "hyperion indexing is lagging")
                            .with("url", address)
                            .with("lag_seconds", lag),
                    );
                    passed = false;
                } else {
                    self.log.add(
                        Finding::new(Kind::Ok, class, "hyperion indexing is fresh")
                            .with("url", address),
                    );
                }
            }
            _ => {
                self.log.add(
                    Finding::new(Kind::Err, class, "hyperion get_actions returned nothing usable")
                        .with("url", address),
                );
                passed = false;
            }
        }

        if !self
            .key_accounts_non_empty(address, "/v2/state/get_key_accounts", class)
            .await
        {
            passed = false;
        }

        if passed {
            ExtraOutcome::pass()
        } else {
            ExtraOutcome::fail()
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // WALLET
    // ════════════════════════════════════════════════════════════════════

    pub(crate) async fn wallet_extra_check(
        &mut self,
        address: &str,
        body: Option<&Value>,
        class: Class,
    ) -> ExtraOutcome {
        let by_account = body
            .and_then(|b| b.get("accounts"))
            .and_then(Value::as_array)
            .map(|accounts| !accounts.is_empty())
            .unwrap_or(false);
        if !by_account {
            self.log.add(
                Finding::new(Kind::Err, class, "authorizer lookup by account returned nothing")
                    .with("url", address),
            );
            return ExtraOutcome::fail();
        }
        self.log.add(
            Finding::new(Kind::Ok, class, "authorizer lookup by account works")
                .with("url", address),
        );

        let request = HttpRequest::post_json(
            format!("{address}/v1/chain/get_accounts_by_authorizers"),
            &json!({"keys": [self.chain.test_public_key]}),
        );
        let envelope = self
            .v
            .http
            .request(&request, &api_request_opts(), &mut self.log, class)
            .await;
        let by_key = serde_json::from_slice::<Value>(&envelope.body)
            .ok()
            .and_then(|body| {
                body.get("accounts")
                    .and_then(Value::as_array)
                    .map(|accounts| !accounts.is_empty())
            })
            .unwrap_or(false);
        if envelope.ok() && by_key {
            self.log.add(
                Finding::new(Kind::Ok, class, "authorizer lookup by key works")
                    .with("url", address),
            );
            ExtraOutcome::pass()
        } else {
            self.log.add(
                Finding::new(Kind::Err, class, "authorizer lookup by key returned nothing")
                    .with("url", address),
            );
            ExtraOutcome::fail()
        }
    }
}

/// Look up a slash-separated feature path in the hyperion health features
/// object.
fn feature_flag(features: &Value, path: &str) -> Option<bool> {
    let mut cursor = features;
    for part in path.split('/') {
        cursor = cursor.get(part)?;
    }
    cursor.as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feature_flag_walks_nested_paths() {
        let features = json!({
            "tables": {"proposals": true, "accounts": false},
            "index_deltas": true,
        });
        assert_eq!(feature_flag(&features, "tables/proposals"), Some(true));
        assert_eq!(feature_flag(&features, "tables/accounts"), Some(false));
        assert_eq!(feature_flag(&features, "index_deltas"), Some(true));
        assert_eq!(feature_flag(&features, "failed_trx"), None);
    }

    #[test]
    fn suite_lists_follow_scheme() {
        assert_eq!(suite_list("history", true), "nodes/history_https");
        assert_eq!(suite_list("hyperion", false), "nodes/hyperion_http");
    }
}
