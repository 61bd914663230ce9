//! End-to-end runs of the validation engine against mock transports, mock
//! DNS and scripted external tools.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use bpscan_cache::CacheStore;
use bpscan_common::config::{ChainProperties, LocationCheck, Meta, RegProducer, VersionCatalog, VersionInfo};
use bpscan_common::findings::{Class, Kind};
use bpscan_common::Report;
use bpscan_probe::{
    HttpMethod, MockHttpTransport, MockResolver, MockResponse, MockToolRunner, ToolOutput,
};
use bpscan_validator::{ValidationInputs, Validator};

const CHAIN_ID: &str = "aca376f206b8fc25a6ed44dbdc66547c36c6c33e3a119ffbeaef943642f0e906";

const TLS13_ONLY_XML: &str = r#"<nmaprun><host><ports><port portid="443">
<script id="ssl-enum-ciphers">
  <table key="TLSv1.3"><table key="ciphers"/></table>
</script></port></ports></host></nmaprun>"#;

const TLS_OBSOLETE_XML: &str = r#"<nmaprun><host><ports><port portid="443">
<script id="ssl-enum-ciphers">
  <table key="TLSv1.0"><table key="ciphers"/></table>
  <table key="TLSv1.2"><table key="ciphers"/></table>
</script></port></ports></host></nmaprun>"#;

const PNG_BYTES: [u8; 12] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

// ════════════════════════════════════════════════════════════════════════════════
// WORLD
// ════════════════════════════════════════════════════════════════════════════════

struct World {
    transport: Arc<MockHttpTransport>,
    tools: Arc<MockToolRunner>,
    validator: Validator,
    _cache_dir: tempfile::TempDir,
}

fn build_world() -> World {
    let transport = Arc::new(MockHttpTransport::new());
    let tools = Arc::new(MockToolRunner::new());

    let mut resolver = MockResolver::new();
    resolver.host_v4("example.net", [93, 184, 216, 34]);
    resolver.host_v4("api.example.net", [93, 184, 216, 35]);
    resolver.host_v4("twitter.com", [104, 244, 42, 1]);
    resolver.host_v4("github.com", [140, 82, 121, 4]);
    resolver.mx("example.net", vec!["mail.example.net.".to_string()]);

    tools.script("nmap", ToolOutput::ok(TLS13_ONLY_XML));
    tools.script(
        "p2ptest",
        ToolOutput::ok(r#"{"status": "success", "speed": 10.5, "error_detail": ""}"#),
    );
    tools.script(
        "curl",
        ToolOutput {
            stdout: String::new(),
            stderr: "* using HTTP2\n< HTTP/2 200".to_string(),
            status_ok: true,
        },
    );
    tools.script("whois", ToolOutput::ok("descr: Example Hosting\ncountry: DE\n"));

    let cache_dir = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(CacheStore::open(cache_dir.path()).expect("cache"));
    let validator = Validator::with_parts(cache, transport.clone(), Arc::new(resolver), tools.clone())
        .with_timing(Duration::ZERO, Duration::ZERO);

    World {
        transport,
        tools,
        validator,
        _cache_dir: cache_dir,
    }
}

fn chain_properties() -> ChainProperties {
    ChainProperties {
        chain_id: CHAIN_ID.to_string(),
        filename: "bp.json".to_string(),
        location_check: LocationCheck::Timezone,
        test_transaction: "b3a5b6e2".to_string(),
        test_public_key: "EOS6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV".to_string(),
        test_account: "eosio".to_string(),
        core_symbol: "EOS".to_string(),
        key_accounts_url: "https://chain.example.net/v1/history/get_key_accounts".to_string(),
        test_big_block: "0000004a".to_string(),
        big_block_transactions: 2,
        class_history: false,
        class_hyperion: false,
        class_wallet: false,
        aloha_id: None,
        test_bpjson_scope: "producerjson".to_string(),
    }
}

fn regproducer() -> RegProducer {
    RegProducer {
        owner: "exampleprod1".to_string(),
        url: "https://example.net".to_string(),
        producer_key: "EOS7abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234abcd".to_string(),
        is_active: true,
        location: 11,
        unpaid_blocks: 0,
        last_claim_time: String::new(),
    }
}

fn versions() -> VersionCatalog {
    let mut catalog = VersionCatalog::default();
    catalog.0.insert(
        "v5.0.3".to_string(),
        VersionInfo {
            name: "v5.0.3".to_string(),
            api_current: true,
        },
    );
    catalog
}

fn inputs(chain: ChainProperties) -> ValidationInputs {
    ValidationInputs {
        regproducer_data: regproducer(),
        chain_properties: chain,
        meta: Meta::default(),
        versions_data: versions(),
        onchainbpjson_enabled: false,
        onchainbpjson_data: String::new(),
        onchainblacklist_enabled: false,
        onchainblacklist_data: String::new(),
    }
}

fn location_block(name: &str) -> Value {
    json!({"country": "DE", "name": name, "latitude": 50.11, "longitude": 8.68})
}

fn bpjson(p2p_port: u16) -> Value {
    json!({
        "producer_account_name": "exampleprod1",
        "org": {
            "candidate_name": "Example BP",
            "email": "ops@example.net",
            "website": "https://example.net",
            "code_of_conduct": "https://example.net/coc",
            "ownership_disclosure": "https://example.net/ownership",
            "branding": {
                "logo_256": "https://example.net/logo256.png",
                "logo_1024": "https://example.net/logo1024.png",
                "logo_svg": "https://example.net/logo.svg",
            },
            "location": location_block("Frankfurt"),
            "social": {
                "twitter": "examplebp",
                "github": "examplebp",
                "wechat": "examplebp",
                "reddit": "examplebp",
            },
        },
        "nodes": [
            {"node_type": "producer", "location": location_block("Frankfurt")},
            {
                "node_type": "full",
                "location": location_block("Frankfurt"),
                "ssl_endpoint": "https://api.example.net",
            },
            {
                "node_type": "seed",
                "location": location_block("Frankfurt"),
                "p2p_endpoint": format!("127.0.0.1:{p2p_port}"),
            },
        ],
    })
}

fn get_info_body() -> Value {
    json!({
        "chain_id": CHAIN_ID,
        "head_block_time": Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        "server_version_string": "v5.0.3",
    })
}

fn register_happy_routes(world: &World, doc: &Value) {
    let t = &world.transport;

    t.on(HttpMethod::Get, "https://example.net", MockResponse::html("<html>bp</html>"));
    t.on(
        HttpMethod::Get,
        "https://example.net/bp.json",
        MockResponse::json(doc).cors(),
    );
    t.on(
        HttpMethod::Get,
        "https://example.net/coc",
        MockResponse::html("<html>conduct</html>"),
    );
    t.on(
        HttpMethod::Get,
        "https://example.net/ownership",
        MockResponse::html("<html>ownership</html>"),
    );
    t.on(
        HttpMethod::Get,
        "https://example.net/logo256.png",
        MockResponse::new(200)
            .header("content-type", "image/png")
            .body(PNG_BYTES.to_vec()),
    );
    t.on(
        HttpMethod::Get,
        "https://example.net/logo1024.png",
        MockResponse::new(200)
            .header("content-type", "image/png")
            .body(PNG_BYTES.to_vec()),
    );
    t.on(
        HttpMethod::Get,
        "https://example.net/logo.svg",
        MockResponse::new(200)
            .header("content-type", "image/svg+xml")
            .body(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_vec()),
    );
    t.on(
        HttpMethod::Get,
        "https://twitter.com/examplebp",
        MockResponse::html("<html>t</html>"),
    );
    t.on(
        HttpMethod::Get,
        "https://github.com/examplebp",
        MockResponse::html("<html>g</html>"),
    );

    // Chain API endpoint.
    t.on(
        HttpMethod::Get,
        "https://api.example.net/v1/chain/get_info",
        MockResponse::json(&get_info_body()).cors(),
    );
    t.on(
        HttpMethod::Post,
        "https://api.example.net/v1/chain/get_block",
        MockResponse::json(&json!({"transactions": [{}, {}]})),
    );
    t.on(
        HttpMethod::Post,
        "https://api.example.net/v1/chain/get_table_rows",
        MockResponse::json(&json!({"rows": []})),
    );
    t.on(
        HttpMethod::Post,
        "https://api.example.net/v1/chain/validate_error_message",
        MockResponse::new(400)
            .header("content-type", "application/json")
            .body(
                json!({"error": {"details": [{"message": "invalid"}]}})
                    .to_string()
                    .into_bytes(),
            ),
    );
    t.on(
        HttpMethod::Post,
        "https://api.example.net/v1/chain/get_currency_balance",
        MockResponse::json(&json!(["1.0000 EOS"])),
    );

    // Signing key lookup: no account owns the key.
    t.on(
        HttpMethod::Post,
        "https://chain.example.net/v1/history/get_key_accounts",
        MockResponse::json(&json!({"account_names": []})),
    );
}

async fn quiet_peer() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(async move {
                        let _held = socket;
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    port
}

fn findings_of_kind(report: &Report, kind: Kind) -> Vec<String> {
    report
        .messages
        .iter()
        .filter(|f| f.kind == kind)
        .map(|f| format!("[{}] {}", f.class, f.detail))
        .collect()
}

fn has_finding(report: &Report, kind: Kind, class: Class, detail: &str) -> bool {
    report
        .messages
        .iter()
        .any(|f| f.kind == kind && f.class == class && f.detail == detail)
}

// ════════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn happy_path_produces_clean_report() {
    let world = build_world();
    let port = quiet_peer().await;
    let doc = bpjson(port);
    register_happy_routes(&world, &doc);

    let report = world.validator.validate(inputs(chain_properties())).await;

    let errs = findings_of_kind(&report, Kind::Err);
    let crits = findings_of_kind(&report, Kind::Crit);
    assert!(errs.is_empty(), "unexpected err findings: {errs:?}");
    assert!(crits.is_empty(), "unexpected crit findings: {crits:?}");

    // HTTP/2 negotiation moved the endpoint into api_https2.
    let https2 = report.resources("nodes/api_https2");
    assert_eq!(https2.len(), 1, "output: {:?}", report.output);
    assert_eq!(https2[0]["address"], "https://api.example.net");
    assert!(report.resources("nodes/api_https").is_empty());

    // P2P peer accepted.
    assert_eq!(report.resources("nodes/p2p").len(), 1);

    // Derived scalars.
    assert_eq!(report.info.get("name"), Some(&json!("Example BP")));
    assert_eq!(report.info.get("timezone"), Some(&json!("UTC+11")));
    assert_eq!(report.info.get("country_name"), Some(&json!("Germany")));

    // Host annotation came from whois.
    let hosts = https2[0]["hosts"].as_array().expect("hosts");
    assert_eq!(hosts[0]["organization"], "Example Hosting");
    assert_eq!(hosts[0]["country"], "DE");
    assert_eq!(hosts[0]["tls_versions"], json!(["TLSv1.3"]));

    // Summary law: every recorded class maxes at warn or below.
    for (class, kind) in &report.message_summary {
        assert!(
            kind.severity() <= Kind::Warn.severity(),
            "class {class} summarized as {kind}"
        );
    }
}

#[tokio::test]
async fn inactive_producer_yields_single_skip() {
    let world = build_world();
    let mut run_inputs = inputs(chain_properties());
    run_inputs.regproducer_data.is_active = false;

    let report = world.validator.validate(run_inputs).await;

    let skips: Vec<_> = report
        .messages
        .iter()
        .filter(|f| f.kind == Kind::Skip && f.class == Class::Regproducer)
        .collect();
    assert_eq!(skips.len(), 1);
    assert!(findings_of_kind(&report, Kind::Err).is_empty());
    assert!(findings_of_kind(&report, Kind::Crit).is_empty());
    assert_eq!(report.message_summary.get(&Class::Regproducer), Some(&Kind::Skip));

    // Nothing was probed.
    assert!(world.transport.calls().is_empty());
}

#[tokio::test]
async fn invalid_registered_url_ends_the_run_early() {
    let world = build_world();
    let mut run_inputs = inputs(chain_properties());
    run_inputs.regproducer_data.url = "not a url".to_string();

    let report = world.validator.validate(run_inputs).await;

    assert!(has_finding(
        &report,
        Kind::Crit,
        Class::Regproducer,
        "invalid configured url"
    ));
    assert!(world.transport.calls().is_empty());
}

#[tokio::test]
async fn wrong_chain_id_is_critical_and_endpoint_is_not_listed() {
    let world = build_world();
    let port = quiet_peer().await;
    let doc = bpjson(port);
    register_happy_routes(&world, &doc);
    world.transport.on(
        HttpMethod::Get,
        "https://api.example.net/v1/chain/get_info",
        MockResponse::json(&json!({
            "chain_id": "abc",
            "head_block_time": Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            "server_version_string": "v5.0.3",
        }))
        .cors(),
    );

    let report = world.validator.validate(inputs(chain_properties())).await;

    assert!(has_finding(&report, Kind::Crit, Class::ApiEndpoint, "wrong chain id"));
    assert!(report.resources("nodes/api_https").is_empty());
    assert!(report.resources("nodes/api_https2").is_empty());
    assert_eq!(
        report.message_summary.get(&Class::ApiEndpoint),
        Some(&Kind::Crit)
    );
}

#[tokio::test]
async fn stale_head_block_is_critical_with_delta() {
    let world = build_world();
    let port = quiet_peer().await;
    let doc = bpjson(port);
    register_happy_routes(&world, &doc);
    let stale = (Utc::now() - chrono::Duration::seconds(30))
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string();
    world.transport.on(
        HttpMethod::Get,
        "https://api.example.net/v1/chain/get_info",
        MockResponse::json(&json!({
            "chain_id": CHAIN_ID,
            "head_block_time": stale,
            "server_version_string": "v5.0.3",
        }))
        .cors(),
    );

    let report = world.validator.validate(inputs(chain_properties())).await;

    let finding = report
        .messages
        .iter()
        .find(|f| f.detail == "last block is not up-to-date")
        .expect("clock-skew finding");
    assert_eq!(finding.kind, Kind::Crit);
    let delta = finding.context["delta_time"].as_i64().expect("delta_time");
    assert!(delta >= 30, "delta was {delta}");
}

#[tokio::test]
async fn duplicate_endpoint_is_probed_once() {
    let world = build_world();
    let port = quiet_peer().await;
    let mut doc = bpjson(port);
    // Second full node advertising the same HTTPS API endpoint.
    doc["nodes"].as_array_mut().expect("nodes").push(json!({
        "node_type": "full",
        "location": location_block("Frankfurt"),
        "ssl_endpoint": "https://api.example.net",
    }));
    register_happy_routes(&world, &doc);

    let report = world.validator.validate(inputs(chain_properties())).await;

    let dupes: Vec<_> = report
        .messages
        .iter()
        .filter(|f| f.detail == "duplicate url")
        .collect();
    assert_eq!(dupes.len(), 1);
    assert_eq!(dupes[0].kind, Kind::Info);
    assert_eq!(dupes[0].class, Class::ApiEndpoint);

    // The endpoint was fetched exactly once and listed exactly once.
    assert_eq!(
        world
            .transport
            .hits("https://api.example.net/v1/chain/get_info"),
        1
    );
    assert_eq!(report.resources("nodes/api_https2").len(), 1);
}

#[tokio::test]
async fn obsolete_tls_versions_warn_once_each() {
    let world = build_world();
    world.tools.script("nmap", ToolOutput::ok(TLS_OBSOLETE_XML));
    let port = quiet_peer().await;
    let doc = bpjson(port);
    register_happy_routes(&world, &doc);

    let report = world.validator.validate(inputs(chain_properties())).await;

    let tls_warns: Vec<_> = report
        .messages
        .iter()
        .filter(|f| f.detail == "obsolete tls version enabled")
        .collect();
    assert_eq!(tls_warns.len(), 1, "warns: {tls_warns:?}");
    assert_eq!(tls_warns[0].context["protocol"], "TLSv1.0");
    assert_eq!(tls_warns[0].kind, Kind::Warn);
}

#[tokio::test]
async fn tls_scan_runs_once_per_target() {
    let world = build_world();
    let port = quiet_peer().await;
    let doc = bpjson(port);
    register_happy_routes(&world, &doc);

    world.validator.validate(inputs(chain_properties())).await;
    assert_eq!(world.tools.call_count("nmap"), 1);

    // A second validation reuses the cached scan.
    let port2 = quiet_peer().await;
    let doc2 = bpjson(port2);
    register_happy_routes(&world, &doc2);
    world.validator.validate(inputs(chain_properties())).await;
    assert_eq!(world.tools.call_count("nmap"), 1);
}

#[tokio::test]
async fn onchain_mismatch_reports_a_diff() {
    let world = build_world();
    let port = quiet_peer().await;
    let doc = bpjson(port);
    register_happy_routes(&world, &doc);

    let mut onchain = doc.clone();
    onchain["org"]["candidate_name"] = json!("Someone Else");

    let mut run_inputs = inputs(chain_properties());
    run_inputs.onchainbpjson_enabled = true;
    run_inputs.onchainbpjson_data = onchain.to_string();

    let report = world.validator.validate(run_inputs).await;

    let finding = report
        .messages
        .iter()
        .find(|f| f.detail == "on-chain bp.json differs from the published file")
        .expect("diff finding");
    assert_eq!(finding.kind, Kind::Err);
    assert_eq!(finding.class, Class::Bpjson);
    let diff = finding.context["diff"].as_str().expect("diff body");
    assert!(diff.contains("Someone Else"));
    assert!(diff.contains("Example BP"));
}

#[tokio::test]
async fn missing_onchain_bpjson_is_critical() {
    let world = build_world();
    let port = quiet_peer().await;
    let doc = bpjson(port);
    register_happy_routes(&world, &doc);

    let mut run_inputs = inputs(chain_properties());
    run_inputs.onchainbpjson_enabled = true;
    run_inputs.onchainbpjson_data = String::new();
    run_inputs.onchainblacklist_enabled = true;
    run_inputs.onchainblacklist_data = "f00dfeed".to_string();

    let report = world.validator.validate(run_inputs).await;

    assert!(has_finding(
        &report,
        Kind::Crit,
        Class::Bpjson,
        "bp.json is not published on chain"
    ));
    // Blacklist hash was attached to the output document.
    assert_eq!(report.resources("chain/blacklist").len(), 1);
    assert_eq!(report.message_summary.get(&Class::Blacklist), Some(&Kind::Ok));
}

#[tokio::test]
async fn chains_json_overrides_the_bpjson_path() {
    let world = build_world();
    let port = quiet_peer().await;
    let doc = bpjson(port);
    register_happy_routes(&world, &doc);
    let mut chains = serde_json::Map::new();
    chains.insert(CHAIN_ID.to_string(), json!("/bpjson/custom.json"));
    world.transport.on(
        HttpMethod::Get,
        "https://example.net/chains.json",
        MockResponse::json(&json!({"chains": chains})),
    );
    world.transport.on(
        HttpMethod::Get,
        "https://example.net/bpjson/custom.json",
        MockResponse::json(&doc).cors(),
    );

    let report = world.validator.validate(inputs(chain_properties())).await;

    assert!(has_finding(
        &report,
        Kind::Ok,
        Class::Chains,
        "chains.json lists this chain"
    ));
    assert!(world
        .transport
        .hits("https://example.net/bpjson/custom.json")
        > 0);
    assert_eq!(world.transport.hits("https://example.net/bp.json"), 0);
}

#[tokio::test]
async fn missing_bpjson_stops_post_schema_checks() {
    let world = build_world();
    world
        .transport
        .on(HttpMethod::Get, "https://example.net", MockResponse::html("<html>bp</html>"));
    world.transport.on(
        HttpMethod::Post,
        "https://chain.example.net/v1/history/get_key_accounts",
        MockResponse::json(&json!({"account_names": []})),
    );
    // No bp.json route: the fetch fails with the default crit.

    let report = world.validator.validate(inputs(chain_properties())).await;

    assert!(has_finding(
        &report,
        Kind::Crit,
        Class::Bpjson,
        "error during http request"
    ));
    // No node probing happened.
    assert_eq!(world.transport.hits("https://api.example.net/v1/chain/get_info"), 0);
    assert!(report.resources("nodes/p2p").is_empty());
}

#[tokio::test]
async fn account_name_mismatch_skips_everything_downstream() {
    let world = build_world();
    let port = quiet_peer().await;
    let mut doc = bpjson(port);
    doc["producer_account_name"] = json!("someoneelse1");
    register_happy_routes(&world, &doc);

    let report = world.validator.validate(inputs(chain_properties())).await;

    assert!(has_finding(
        &report,
        Kind::Crit,
        Class::Bpjson,
        "producer_account_name does not match the registration"
    ));
    assert_eq!(world.transport.hits("https://api.example.net/v1/chain/get_info"), 0);
}

#[tokio::test]
async fn lowercase_country_warns_and_is_accepted() {
    let world = build_world();
    let port = quiet_peer().await;
    let mut doc = bpjson(port);
    doc["org"]["location"]["country"] = json!("de");
    register_happy_routes(&world, &doc);

    let report = world.validator.validate(inputs(chain_properties())).await;

    let warning = report
        .messages
        .iter()
        .find(|f| f.detail == "country code should be uppercase")
        .expect("case warning");
    assert_eq!(warning.context["suggested"], "DE");
    assert_eq!(report.info.get("country_name"), Some(&json!("Germany")));
}

#[tokio::test]
async fn null_island_location_is_rejected() {
    let world = build_world();
    let port = quiet_peer().await;
    let mut doc = bpjson(port);
    doc["org"]["location"]["latitude"] = json!(0.0);
    doc["org"]["location"]["longitude"] = json!(0.0);
    register_happy_routes(&world, &doc);

    let report = world.validator.validate(inputs(chain_properties())).await;

    assert!(has_finding(
        &report,
        Kind::Err,
        Class::Org,
        "location coordinates are exactly (0, 0)"
    ));
}

#[tokio::test]
async fn every_probe_failure_is_a_finding_not_a_panic() {
    // A world where literally nothing is reachable.
    let world = build_world();

    let report = world.validator.validate(inputs(chain_properties())).await;

    assert!(has_finding(
        &report,
        Kind::Crit,
        Class::Bpjson,
        "error during http request"
    ));
    // The summary covers every class that produced findings.
    for finding in &report.messages {
        let summarized = report.message_summary.get(&finding.class).expect("class summarized");
        assert!(summarized.severity() >= finding.kind.severity());
    }
}
