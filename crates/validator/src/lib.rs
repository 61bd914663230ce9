//! # bpscan Validation Engine
//!
//! One [`Validator`] instance validates one block producer per
//! [`Validator::validate`] call and returns a [`Report`]. The engine runs a
//! fixed, sequential pipeline:
//!
//! 1. regproducer sanity (active flag, URL syntax, registered location,
//!    signing key reuse, claim-rewards window)
//! 2. home page probe
//! 3. chains.json discovery
//! 4. bp.json fetch
//! 5. schema checks over `org.*`
//! 6. aloha reliability, node endpoints, on-chain reconciliation
//!    (all gated on the account-name match)
//! 7. severity summary + run-metadata finding
//!
//! Probes never short-circuit the run by unwinding: every outcome lands in
//! the finding stream and the pipeline decides what is fatal. All network
//! and tool I/O goes through the ports in `bpscan-probe`, so the whole
//! engine can be driven end-to-end against mocks.
//!
//! A validation is internally sequential; run many validators in parallel
//! across BPs and share the [`CacheStore`] between them.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use bpscan_cache::CacheStore;
use bpscan_common::config::{ChainProperties, Meta, RegProducer, VersionCatalog};
use bpscan_common::findings::{Class, Finding, FindingLog, Kind};
use bpscan_common::{DupeRegistry, Report};
use bpscan_probe::{
    HickoryResolver, Http2Probe, HttpProbe, HttpTransport, IpResolver, NameResolver, P2pProbe,
    ReqwestTransport, SystemToolRunner, TlsProbe, ToolRunner, WhoisProbe,
};

mod api;
mod bpjson_checks;
mod chain_check;
mod history;
mod location;
mod nodes;
mod regproducer;
mod url_check;

pub use url_check::{CorsPolicy, SslPolicy};

// ════════════════════════════════════════════════════════════════════════════════
// INPUTS
// ════════════════════════════════════════════════════════════════════════════════

/// Everything the crawler hands the engine for one validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationInputs {
    pub regproducer_data: RegProducer,
    pub chain_properties: ChainProperties,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub versions_data: VersionCatalog,
    #[serde(default)]
    pub onchainbpjson_enabled: bool,
    #[serde(default)]
    pub onchainbpjson_data: String,
    #[serde(default)]
    pub onchainblacklist_enabled: bool,
    #[serde(default)]
    pub onchainblacklist_data: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// VALIDATOR
// ════════════════════════════════════════════════════════════════════════════════

/// The validation engine. Construct once, share behind an `Arc`, call
/// [`validate`](Self::validate) per BP.
pub struct Validator {
    pub(crate) http: HttpProbe,
    pub(crate) resolver: IpResolver,
    pub(crate) tls: TlsProbe,
    pub(crate) p2p: P2pProbe,
    pub(crate) http2: Http2Probe,
}

impl Validator {
    /// Production wiring: reqwest transport, hickory DNS, real child
    /// processes, shared cache at `cache_dir`.
    pub fn new(cache_dir: &Path) -> anyhow::Result<Self> {
        let cache = Arc::new(CacheStore::open(cache_dir)?);
        let transport = Arc::new(ReqwestTransport::new()?);
        let dns = Arc::new(HickoryResolver::new());
        let tools: Arc<dyn ToolRunner> = Arc::new(SystemToolRunner);
        Ok(Self::with_parts(cache, transport, dns, tools))
    }

    /// Assemble an engine from explicit ports. Tests pass mocks here.
    pub fn with_parts(
        cache: Arc<CacheStore>,
        transport: Arc<dyn HttpTransport>,
        dns: Arc<dyn NameResolver>,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        let whois = WhoisProbe::new(tools.clone(), cache.clone());
        Self {
            http: HttpProbe::new(transport, cache.clone()),
            resolver: IpResolver::new(dns, whois),
            tls: TlsProbe::new(tools.clone(), cache),
            p2p: P2pProbe::new(tools.clone()),
            http2: Http2Probe::new(tools),
        }
    }

    /// Override the P2P settle delay and the TLS scan cooldown.
    #[must_use]
    pub fn with_timing(mut self, p2p_settle: Duration, tls_cooldown: Duration) -> Self {
        self.p2p = self.p2p.with_settle(p2p_settle);
        self.tls = self.tls.with_cooldown(tls_cooldown);
        self
    }

    /// Validate one block producer and return the report.
    pub async fn validate(&self, inputs: ValidationInputs) -> Report {
        let started = Instant::now();
        info!(owner = %inputs.regproducer_data.owner, "validation started");

        let mut run = Run::new(self, inputs);
        run.execute().await;
        let report = run.finish(started);

        info!(
            elapsed = report.meta.elapsed_time,
            findings = report.messages.len(),
            "validation finished"
        );
        report
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// RUN (per-validation state)
// ════════════════════════════════════════════════════════════════════════════════

/// Mutable state owned by a single validation: the finding stream, the
/// duplicate registry and the report under construction. Discarded when the
/// run completes.
pub(crate) struct Run<'v> {
    pub(crate) v: &'v Validator,
    pub(crate) regproducer: RegProducer,
    pub(crate) chain: ChainProperties,
    pub(crate) meta: Meta,
    pub(crate) versions: VersionCatalog,
    pub(crate) onchain_bpjson_enabled: bool,
    pub(crate) onchain_bpjson: String,
    pub(crate) onchain_blacklist_enabled: bool,
    pub(crate) onchain_blacklist: String,
    pub(crate) log: FindingLog,
    pub(crate) dupes: DupeRegistry,
    pub(crate) report: Report,
}

impl<'v> Run<'v> {
    fn new(v: &'v Validator, inputs: ValidationInputs) -> Self {
        let regproducer_value =
            serde_json::to_value(&inputs.regproducer_data).unwrap_or(Value::Null);
        Self {
            v,
            regproducer: inputs.regproducer_data,
            chain: inputs.chain_properties,
            meta: inputs.meta,
            versions: inputs.versions_data,
            onchain_bpjson_enabled: inputs.onchainbpjson_enabled,
            onchain_bpjson: inputs.onchainbpjson_data,
            onchain_blacklist_enabled: inputs.onchainblacklist_enabled,
            onchain_blacklist: inputs.onchainblacklist_data,
            log: FindingLog::new(),
            dupes: DupeRegistry::new(),
            report: Report::new(regproducer_value),
        }
    }

    async fn execute(&mut self) {
        self.report.set_info("name", self.regproducer.owner.clone());
        if let Some(rank) = self.meta.rank {
            self.report.set_info("rank", rank);
        }
        self.report.set_info("is_top_21", self.meta.is_top_21);
        self.report.set_info("is_standby", self.meta.is_standby);

        if !self.regproducer.is_active {
            self.log.add(Finding::new(
                Kind::Skip,
                Class::Regproducer,
                "producer is not active",
            ));
            return;
        }

        let Some(home_url) = self.check_regproducer_url() else {
            return;
        };
        self.check_regproducer_location();
        self.check_regproducer_key().await;
        self.check_claim_rewards();
        self.check_home_page(&home_url).await;

        let bpjson_url = self.discover_bpjson_url(&home_url).await;
        let Some(doc) = self.fetch_bpjson(&bpjson_url).await else {
            return;
        };
        self.report.input = doc.clone();

        let name_matches = self.check_schema(&doc).await;
        if !name_matches {
            return;
        }

        self.check_aloha().await;
        self.check_nodes(&doc).await;
        self.check_onchain(&doc);
    }

    fn finish(mut self, started: Instant) -> Report {
        let elapsed = started.elapsed().as_secs_f64();
        self.log.prefix(
            Finding::new(Kind::Ok, Class::General, "validation run")
                .with("validator_version", env!("CARGO_PKG_VERSION"))
                .with("elapsed_time", elapsed),
        );
        self.report.message_summary = self.log.summarize();
        self.report.messages = self.log.into_entries();
        self.report.meta.elapsed_time = elapsed;
        self.report
    }
}
