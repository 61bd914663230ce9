//! Node-endpoint composition.
//!
//! Walks `nodes[]`, probes every advertised endpoint, classifies nodes by
//! type and aggregates the class-level verdicts: a producer needs at least
//! one working API endpoint and one working P2P peer somewhere in the list,
//! plus one node of each type.

use serde_json::Value;
use url::Url;

use bpscan_common::config::ContentTypeRule;
use bpscan_common::findings::{Class, Finding, Kind};
use bpscan_common::report::ResourceEntry;
use bpscan_probe::SocketCheck;

use crate::url_check::{CorsPolicy, ExtraCheck, SslPolicy, UrlOptions};
use crate::Run;

/// Below this sync speed (blocks per second) a peer earns a warning.
const MIN_SYNC_SPEED: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeType {
    Producer,
    Full,
    Seed,
}

impl NodeType {
    const fn label(self) -> &'static str {
        match self {
            NodeType::Producer => "producer",
            NodeType::Full => "full",
            NodeType::Seed => "seed",
        }
    }
}

#[derive(Debug, Default)]
struct NodeCounts {
    producer: usize,
    full: usize,
    seed: usize,
    api_http: usize,
    api_https: usize,
    p2p: usize,
}

impl Run<'_> {
    pub(crate) async fn check_nodes(&mut self, doc: &Value) {
        let nodes = doc
            .get("nodes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut counts = NodeCounts::default();
        let mut warned_seed_without_p2p = false;
        let mut warned_full_without_api = false;

        for node in &nodes {
            if let Some(location) = node.get("location") {
                self.check_location_block(location, Class::Bpjson, false);
            }

            let node_type = self.classify_node(node);
            let type_label = node_type.map(NodeType::label).unwrap_or("unknown");
            let location = node.get("location").cloned();

            let api_endpoint = non_empty_str(node, "api_endpoint");
            let ssl_endpoint = non_empty_str(node, "ssl_endpoint");
            let p2p_endpoint = non_empty_str(node, "p2p_endpoint");

            let mut node_has_valid_api = false;
            let mut node_has_valid_p2p = false;

            if let Some(url) = &api_endpoint {
                if self
                    .check_api_endpoint(url, false, type_label, location.clone())
                    .await
                {
                    counts.api_http += 1;
                    node_has_valid_api = true;
                    self.run_feature_suites(url, false, type_label, location.clone()).await;
                }
            }
            if let Some(url) = &ssl_endpoint {
                if self
                    .check_api_endpoint(url, true, type_label, location.clone())
                    .await
                {
                    counts.api_https += 1;
                    node_has_valid_api = true;
                    self.run_feature_suites(url, true, type_label, location.clone()).await;
                }
            }
            if let Some(peer) = &p2p_endpoint {
                if self
                    .check_p2p_endpoint(peer, type_label, location.clone())
                    .await
                {
                    counts.p2p += 1;
                    node_has_valid_p2p = true;
                }
            }

            let exposes_api = api_endpoint.is_some() || ssl_endpoint.is_some();
            let exposes_p2p = p2p_endpoint.is_some();
            match node_type {
                Some(NodeType::Producer) => {
                    counts.producer += 1;
                    if exposes_api || exposes_p2p {
                        self.log.add(Finding::new(
                            Kind::Warn,
                            Class::Bpjson,
                            "producer node should not expose endpoints",
                        ));
                    }
                }
                Some(NodeType::Seed) => {
                    counts.seed += 1;
                    if exposes_api {
                        self.log.add(Finding::new(
                            Kind::Warn,
                            Class::Bpjson,
                            "seed node should not expose an api endpoint",
                        ));
                    }
                    if !node_has_valid_p2p && !warned_seed_without_p2p {
                        warned_seed_without_p2p = true;
                        self.log.add(Finding::new(
                            Kind::Warn,
                            Class::Bpjson,
                            "seed node has no valid p2p endpoint",
                        ));
                    }
                }
                Some(NodeType::Full) => {
                    counts.full += 1;
                    if exposes_p2p {
                        self.log.add(Finding::new(
                            Kind::Warn,
                            Class::Bpjson,
                            "full node should not expose a p2p endpoint",
                        ));
                    }
                    if !node_has_valid_api && !warned_full_without_api {
                        warned_full_without_api = true;
                        self.log.add(Finding::new(
                            Kind::Warn,
                            Class::Bpjson,
                            "full node has no valid api endpoint",
                        ));
                    }
                }
                None => {}
            }
        }

        // ── Aggregation ───────────────────────────────────────────────
        for (label, count) in [
            ("producer", counts.producer),
            ("full", counts.full),
            ("seed", counts.seed),
        ] {
            if count == 0 {
                self.log.add(
                    Finding::new(Kind::Err, Class::Bpjson, "node type is not declared")
                        .with("node_type", label),
                );
            }
        }

        if counts.api_http + counts.api_https == 0 {
            self.log.add(Finding::new(
                Kind::Crit,
                Class::ApiEndpoint,
                "no working api endpoint",
            ));
        } else if counts.api_https == 0 {
            self.log.add(Finding::new(
                Kind::Warn,
                Class::ApiEndpoint,
                "no https api endpoint",
            ));
        }

        if counts.p2p == 0 {
            self.log.add(Finding::new(
                Kind::Crit,
                Class::P2pEndpoint,
                "no working p2p endpoint",
            ));
        }
    }

    fn classify_node(&mut self, node: &Value) -> Option<NodeType> {
        match node.get("node_type") {
            Some(Value::String(node_type)) => match node_type.as_str() {
                "producer" => Some(NodeType::Producer),
                "full" => Some(NodeType::Full),
                "seed" => Some(NodeType::Seed),
                "query" => {
                    self.log.add(Finding::new(
                        Kind::Err,
                        Class::Bpjson,
                        "node_type query is not valid, use full",
                    ));
                    Some(NodeType::Full)
                }
                other => {
                    self.log.add(
                        Finding::new(Kind::Err, Class::Bpjson, "invalid node_type")
                            .with("node_type", other),
                    );
                    None
                }
            },
            Some(_) => {
                self.log
                    .add(Finding::new(Kind::Err, Class::Bpjson, "invalid node_type"));
                None
            }
            None => {
                if node.get("is_producer").and_then(Value::as_bool) == Some(true) {
                    self.log.add(Finding::new(
                        Kind::Warn,
                        Class::Bpjson,
                        "is_producer is deprecated, declare node_type producer",
                    ));
                    Some(NodeType::Producer)
                } else {
                    self.log
                        .add(Finding::new(Kind::Err, Class::Bpjson, "node has no node_type"));
                    None
                }
            }
        }
    }

    async fn check_api_endpoint(
        &mut self,
        url: &str,
        ssl: bool,
        node_type: &str,
        location: Option<Value>,
    ) -> bool {
        let mut opts = UrlOptions::new(Class::ApiEndpoint)
            .ssl(if ssl { SslPolicy::On } else { SslPolicy::Off })
            .content_type(ContentTypeRule::Json)
            .cors_origin(CorsPolicy::On)
            .cors_headers(CorsPolicy::Should)
            .non_standard_port(true)
            .modern_tls(ssl)
            .dupe(Kind::Info)
            .failure_code(Kind::Err)
            .url_ext("/v1/chain/get_info")
            .cache(300)
            .extra_check(ExtraCheck::Api { ssl })
            .add_to_list(if ssl {
                "nodes/api_https"
            } else {
                "nodes/api_http"
            })
            .node_type(node_type);
        if let Some(location) = location {
            opts = opts.location(location);
        }
        self.check_url(url, opts).await.is_some()
    }

    async fn run_feature_suites(
        &mut self,
        url: &str,
        ssl: bool,
        node_type: &str,
        location: Option<Value>,
    ) {
        if self.chain.class_history {
            self.check_history_suite(url, ssl, node_type, location.clone()).await;
        }
        if self.chain.class_hyperion {
            self.check_hyperion_suite(url, ssl, node_type, location.clone()).await;
        }
        if self.chain.class_wallet {
            self.check_wallet_suite(url, ssl, node_type, location).await;
        }
    }

    async fn check_p2p_endpoint(
        &mut self,
        peer: &str,
        node_type: &str,
        location: Option<Value>,
    ) -> bool {
        let class = Class::P2pEndpoint;
        let Some((host, port)) = split_peer(peer) else {
            self.log.add(
                Finding::new(Kind::Err, class, "invalid p2p endpoint, expected host:port")
                    .with("peer", peer),
            );
            return false;
        };

        if !self.dupes.check(class, peer) {
            self.log
                .add(Finding::new(Kind::Info, class, "duplicate url").with("peer", peer));
            return false;
        }

        match self.v.p2p.socket_check(&host, port).await {
            SocketCheck::ConnectFailed(error) => {
                self.log.add(
                    Finding::new(Kind::Err, class, "could not connect to p2p endpoint")
                        .with("peer", peer)
                        .with("error", error),
                );
                return false;
            }
            SocketCheck::Dropped(reason) => {
                self.log.add(
                    Finding::new(Kind::Err, class, "p2p peer dropped the connection")
                        .with("peer", peer)
                        .with("reason", reason),
                );
                return false;
            }
            SocketCheck::Open => {}
        }

        let chain_api = origin_of(&self.chain.key_accounts_url);
        let speed = match self.v.p2p.speed_test(&chain_api, &host, port).await {
            Ok(result) => result,
            Err(e) => {
                self.log.add(
                    Finding::new(Kind::Err, class, "p2p speed test could not run")
                        .with("peer", peer)
                        .with("error", e.to_string()),
                );
                return false;
            }
        };

        if speed.status != "success" {
            self.log.add(
                Finding::new(Kind::Err, class, "p2p block sync failed")
                    .with("peer", peer)
                    .with("error_detail", speed.error_detail),
            );
            return false;
        }
        if speed.speed < MIN_SYNC_SPEED {
            self.log.add(
                Finding::new(Kind::Warn, class, "p2p block sync is slow")
                    .with("peer", peer)
                    .with("speed", speed.speed),
            );
        } else {
            self.log.add(
                Finding::new(Kind::Ok, class, "valid p2p endpoint")
                    .with("peer", peer)
                    .with("speed", speed.speed),
            );
        }

        let mut entry = ResourceEntry::new(peer);
        entry.node_type = Some(node_type.to_string());
        entry.location = location;
        self.report.add_resource("nodes/p2p", entry);
        true
    }
}

fn non_empty_str(node: &Value, field: &str) -> Option<String> {
    node.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Split `host:port`. The host may not itself contain `:` (IPv6 peers are
/// not supported by the probe).
fn split_peer(peer: &str) -> Option<(String, u16)> {
    let (host, port) = peer.trim().trim_end_matches('/').rsplit_once(':')?;
    if host.is_empty() || host.contains(':') {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host.to_string(), port))
}

/// Scheme and authority of a URL, used as the chain API base for the speed
/// test tool.
fn origin_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            match (parsed.host_str(), parsed.port()) {
                (Some(host), Some(port)) => format!("{scheme}://{host}:{port}"),
                (Some(host), None) => format!("{scheme}://{host}"),
                _ => url.to_string(),
            }
        }
        Err(_) => url.to_string(),
    }
}
