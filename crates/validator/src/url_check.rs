//! The URL validator.
//!
//! Every advertised URL flows through [`Run::check_url`]: syntax and
//! blacklist screening, duplicate suppression, DNS vetting, the HTTP probe,
//! redirect and HTTPS policy, CORS policy, content-type whitelisting, TLS
//! posture, body parsing, and an optional domain-specific extra check. Each
//! decision emits exactly one finding; the probe as a whole ends in either
//! one `ok` plus an optional output-document entry, or the configured
//! failure finding.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{Map, Value};
use url::Url;

use bpscan_common::config::{ContentTypeRule, BAD_URLS};
use bpscan_common::findings::{Class, Finding, Kind};
use bpscan_common::report::{HostRecord, ResourceEntry};
use bpscan_probe::{HttpMethod, HttpRequest, RequestOpts, ResponseEnvelope, MODERN_TLS_VERSIONS};

use crate::Run;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

// ════════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ════════════════════════════════════════════════════════════════════════════════

/// HTTPS requirement for a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslPolicy {
    /// HTTPS preferred; plain HTTP earns a `warn`.
    #[default]
    Either,
    /// HTTPS required.
    On,
    /// Plain HTTP required.
    Off,
}

/// CORS header requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorsPolicy {
    #[default]
    Either,
    /// Header required; violation is fatal for the probe.
    On,
    /// Header required; violation demotes to `err` and drops the resource
    /// from the output document, but the probe itself continues.
    Should,
    /// Header must be absent.
    Off,
}

/// Domain-specific checks run against the fetched body before the probe is
/// declared valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExtraCheck {
    /// `get_info` assertions plus the chain API sub-test catalog.
    Api { ssl: bool },
    /// History v1 suite (main request is `get_transaction`).
    History,
    /// Hyperion v2 suite (main request is `/v2/health`).
    Hyperion,
    /// Wallet suite (main request is `get_accounts_by_authorizers`).
    Wallet,
}

/// Result of an extra check: pass/fail, fields merged into the resource
/// entry's `info`, and an optional rename applied to the output list.
#[derive(Debug, Default)]
pub(crate) struct ExtraOutcome {
    pub passed: bool,
    pub info: Map<String, Value>,
    pub list_rename: Option<(&'static str, &'static str)>,
}

impl ExtraOutcome {
    pub(crate) fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub(crate) fn fail() -> Self {
        Self::default()
    }
}

/// Per-probe configuration record. Every option of the URL validator is
/// enumerable; the builders keep call sites readable.
#[derive(Debug, Clone)]
pub(crate) struct UrlOptions {
    pub class: Class,
    pub ssl: SslPolicy,
    pub cors_origin: CorsPolicy,
    pub cors_headers: CorsPolicy,
    pub content_type: ContentTypeRule,
    pub non_standard_port: bool,
    pub modern_tls: bool,
    pub dupe: Kind,
    pub failure_code: Kind,
    pub add_to_list: Option<String>,
    pub url_ext: String,
    pub extra_check: Option<ExtraCheck>,
    pub method: HttpMethod,
    pub body: Option<Value>,
    pub request_timeout: Duration,
    pub cache_timeout_secs: i64,
    pub cache_fast_fail: bool,
    pub node_type: Option<String>,
    pub location: Option<Value>,
}

impl UrlOptions {
    pub(crate) fn new(class: Class) -> Self {
        Self {
            class,
            ssl: SslPolicy::Either,
            cors_origin: CorsPolicy::Either,
            cors_headers: CorsPolicy::Either,
            content_type: ContentTypeRule::Any,
            non_standard_port: false,
            modern_tls: false,
            dupe: Kind::Err,
            failure_code: Kind::Crit,
            add_to_list: None,
            url_ext: String::new(),
            extra_check: None,
            method: HttpMethod::Get,
            body: None,
            request_timeout: Duration::from_secs(10),
            cache_timeout_secs: 0,
            cache_fast_fail: false,
            node_type: None,
            location: None,
        }
    }

    pub(crate) fn ssl(mut self, policy: SslPolicy) -> Self {
        self.ssl = policy;
        self
    }

    pub(crate) fn cors_origin(mut self, policy: CorsPolicy) -> Self {
        self.cors_origin = policy;
        self
    }

    pub(crate) fn cors_headers(mut self, policy: CorsPolicy) -> Self {
        self.cors_headers = policy;
        self
    }

    pub(crate) fn content_type(mut self, rule: ContentTypeRule) -> Self {
        self.content_type = rule;
        self
    }

    pub(crate) fn non_standard_port(mut self, flag: bool) -> Self {
        self.non_standard_port = flag;
        self
    }

    pub(crate) fn modern_tls(mut self, flag: bool) -> Self {
        self.modern_tls = flag;
        self
    }

    pub(crate) fn dupe(mut self, kind: Kind) -> Self {
        self.dupe = kind;
        self
    }

    pub(crate) fn failure_code(mut self, kind: Kind) -> Self {
        self.failure_code = kind;
        self
    }

    pub(crate) fn add_to_list(mut self, list: &str) -> Self {
        self.add_to_list = Some(list.to_string());
        self
    }

    pub(crate) fn url_ext(mut self, ext: &str) -> Self {
        self.url_ext = ext.to_string();
        self
    }

    pub(crate) fn extra_check(mut self, check: ExtraCheck) -> Self {
        self.extra_check = Some(check);
        self
    }

    pub(crate) fn post(mut self, body: Value) -> Self {
        self.method = HttpMethod::Post;
        self.body = Some(body);
        self
    }

    pub(crate) fn cache(mut self, secs: i64) -> Self {
        self.cache_timeout_secs = secs;
        self
    }

    pub(crate) fn fast_fail(mut self) -> Self {
        self.cache_fast_fail = true;
        self
    }

    pub(crate) fn node_type(mut self, node_type: &str) -> Self {
        self.node_type = Some(node_type.to_string());
        self
    }

    pub(crate) fn location(mut self, location: Value) -> Self {
        self.location = Some(location);
        self
    }
}

/// Successful probe result handed back to the caller.
pub(crate) struct UrlOutcome {
    pub envelope: ResponseEnvelope,
    pub body_json: Option<Value>,
    /// Canonical address (redundant slashes collapsed, trailing slash and
    /// default port stripped).
    pub address: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// URL SCRUBBING (pure helpers)
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ScrubbedUrl {
    pub address: String,
    pub collapsed_slashes: bool,
    pub stripped_trailing_slash: bool,
}

/// Normalize a syntactically valid URL: collapse `//` inside the path, strip
/// a trailing `/`, strip the protocol default port.
pub(crate) fn scrub_url(raw: &str) -> ScrubbedUrl {
    let (scheme, rest) = raw
        .split_once("://")
        .map(|(s, r)| (s.to_string(), r.to_string()))
        .unwrap_or_else(|| (String::new(), raw.to_string()));

    let (mut authority, mut path) = match rest.find('/') {
        Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
        None => (rest, String::new()),
    };

    let mut collapsed = false;
    while path.contains("//") {
        path = path.replace("//", "/");
        collapsed = true;
    }

    let mut stripped = false;
    if path.ends_with('/') {
        path.pop();
        stripped = true;
    }
    if path.is_empty() && authority.ends_with('/') {
        authority.pop();
        stripped = true;
    }

    let default_port = match scheme.as_str() {
        "https" => ":443",
        "http" => ":80",
        _ => "",
    };
    if !default_port.is_empty() {
        if let Some(stripped_authority) = authority.strip_suffix(default_port) {
            authority = stripped_authority.to_string();
        }
    }

    let address = if scheme.is_empty() {
        format!("{authority}{path}")
    } else {
        format!("{scheme}://{authority}{path}")
    };
    ScrubbedUrl {
        address,
        collapsed_slashes: collapsed,
        stripped_trailing_slash: stripped,
    }
}

/// Fixed-reason rejection for placeholder and local addresses. Returns the
/// finding detail.
pub(crate) fn hard_reject(raw: &str, host: &str) -> Option<String> {
    if host == "localhost" || host.starts_with("127.") {
        return Some("url points at localhost".to_string());
    }
    let trimmed = raw.trim_end_matches('/');
    BAD_URLS
        .iter()
        .find(|(bad, _)| *bad == trimmed)
        .map(|(_, reason)| format!("url is {reason}"))
}

fn cors_origin_acceptable(value: &str) -> bool {
    value.trim() == "*"
}

fn cors_headers_acceptable(value: &str) -> bool {
    let value = value.trim();
    if value == "*" {
        return true;
    }
    let listed: Vec<String> = value
        .split(',')
        .map(|part| part.trim().to_ascii_lowercase())
        .collect();
    ["content-type", "origin", "accept"]
        .iter()
        .all(|needed| listed.iter().any(|have| have == needed))
}

// ════════════════════════════════════════════════════════════════════════════════
// THE PROBE
// ════════════════════════════════════════════════════════════════════════════════

impl Run<'_> {
    /// Validate a single URL under the given options. Returns `None` when
    /// the probe failed or was suppressed as a duplicate; the finding stream
    /// always records why.
    pub(crate) async fn check_url(&mut self, raw_url: &str, opts: UrlOptions) -> Option<UrlOutcome> {
        let class = opts.class;

        // ── Syntax ────────────────────────────────────────────────────
        if !raw_url.starts_with("http://") && !raw_url.starts_with("https://") {
            self.log.add(
                Finding::new(opts.failure_code, class, "invalid url").with("url", raw_url),
            );
            return None;
        }
        let parsed = match Url::parse(raw_url) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.log.add(
                    Finding::new(opts.failure_code, class, "invalid url")
                        .with("url", raw_url)
                        .with("error", e.to_string()),
                );
                return None;
            }
        };
        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                self.log.add(
                    Finding::new(opts.failure_code, class, "invalid url").with("url", raw_url),
                );
                return None;
            }
        };

        if let Some(reason) = hard_reject(raw_url, &host) {
            self.log
                .add(Finding::new(Kind::Err, class, reason).with("url", raw_url));
            return None;
        }

        // ── Scrubbing ─────────────────────────────────────────────────
        let scrubbed = scrub_url(raw_url);
        if scrubbed.collapsed_slashes {
            self.log.add(
                Finding::new(Kind::Warn, class, "redundant slashes in url path")
                    .with("url", raw_url),
            );
        }
        if scrubbed.stripped_trailing_slash {
            self.log.add(
                Finding::new(Kind::Warn, class, "url has a trailing slash").with("url", raw_url),
            );
        }
        let address = scrubbed.address;

        // ── Duplicate suppression ─────────────────────────────────────
        if !self.dupes.check(class, &address) {
            self.log
                .add(Finding::new(opts.dupe, class, "duplicate url").with("url", address));
            return None;
        }

        // ── Port ──────────────────────────────────────────────────────
        // `Url::port()` is `Some` only for explicit, non-default ports.
        if opts.non_standard_port {
            if let Some(port) = parsed.port() {
                self.log.add(
                    Finding::new(Kind::Info, class, "non-standard port")
                        .with("url", address.clone())
                        .with("port", port),
                );
            }
        }

        // ── HTTPS policy (request URL) ────────────────────────────────
        let scheme_https = parsed.scheme() == "https";
        match opts.ssl {
            SslPolicy::On if !scheme_https => {
                self.log.add(
                    Finding::new(opts.failure_code, class, "url must use https")
                        .with("url", address),
                );
                return None;
            }
            SslPolicy::Off if scheme_https => {
                self.log.add(
                    Finding::new(opts.failure_code, class, "url must use plain http")
                        .with("url", address),
                );
                return None;
            }
            SslPolicy::Either if !scheme_https => {
                self.log.add(
                    Finding::new(Kind::Warn, class, "url should use https")
                        .with("url", address.clone()),
                );
            }
            _ => {}
        }

        // ── DNS ───────────────────────────────────────────────────────
        let hosts = self.v.resolver.resolve(&host, &mut self.log, class).await;
        if hosts.is_empty() {
            return None;
        }

        // ── Request ───────────────────────────────────────────────────
        let request_url = format!("{address}{}", opts.url_ext);
        let request = match opts.method {
            HttpMethod::Get => HttpRequest::get(&request_url),
            HttpMethod::Post => HttpRequest::post_json(
                &request_url,
                opts.body.as_ref().unwrap_or(&Value::Object(Map::new())),
            ),
        };
        let request_opts = RequestOpts {
            request_timeout: opts.request_timeout,
            cache_timeout_secs: opts.cache_timeout_secs,
            cache_fast_fail: opts.cache_fast_fail,
            suppress_timeout_message: false,
        };
        let envelope = self
            .v
            .http
            .request(&request, &request_opts, &mut self.log, class)
            .await;

        if envelope.code == 0 {
            self.log.add(
                Finding::new(opts.failure_code, class, "error during http request")
                    .with("url", request_url)
                    .with("error", envelope.status_line.clone()),
            );
            return None;
        }
        if !envelope.ok() {
            self.log.add(
                Finding::new(opts.failure_code, class, "unexpected http response code")
                    .with("url", request_url)
                    .with("response_code", envelope.code),
            );
            return None;
        }

        // ── HTTPS policy (final URL after redirect) ───────────────────
        if envelope.final_url != request_url {
            let final_https = envelope.final_url.starts_with("https://");
            match opts.ssl {
                SslPolicy::On if !final_https => {
                    self.log.add(
                        Finding::new(opts.failure_code, class, "redirects to an insecure url")
                            .with("url", address)
                            .with("final_url", envelope.final_url.clone()),
                    );
                    return None;
                }
                SslPolicy::Off if final_https => {
                    self.log.add(
                        Finding::new(opts.failure_code, class, "redirects to an https url")
                            .with("url", address)
                            .with("final_url", envelope.final_url.clone()),
                    );
                    return None;
                }
                SslPolicy::Either if scheme_https && !final_https => {
                    self.log.add(
                        Finding::new(Kind::Warn, class, "redirects away from https")
                            .with("url", address.clone())
                            .with("final_url", envelope.final_url.clone()),
                    );
                }
                _ => {}
            }
        }

        // ── Content type ──────────────────────────────────────────────
        if !matches!(opts.content_type, ContentTypeRule::Any) {
            let media = envelope.media_type();
            if !opts.content_type.allowed().contains(&media.as_str()) {
                self.log.add(
                    Finding::new(Kind::Err, class, "unexpected content type")
                        .with("url", address)
                        .with("content_type", media)
                        .with("expected", opts.content_type.label()),
                );
                return None;
            }
        }

        // ── CORS ──────────────────────────────────────────────────────
        let mut listed = opts.add_to_list.clone();
        let cors_checks: [(&str, CorsPolicy, fn(&str) -> bool); 2] = [
            (
                "access-control-allow-origin",
                opts.cors_origin,
                cors_origin_acceptable,
            ),
            (
                "access-control-allow-headers",
                opts.cors_headers,
                cors_headers_acceptable,
            ),
        ];
        for (header, policy, acceptable) in cors_checks {
            let values = envelope.header(header);
            match policy {
                CorsPolicy::Either => {}
                CorsPolicy::Off => {
                    if !values.is_empty() {
                        self.log.add(
                            Finding::new(Kind::Err, class, "cors header must be absent")
                                .with("url", address.clone())
                                .with("header", header),
                        );
                        return None;
                    }
                }
                CorsPolicy::On | CorsPolicy::Should => {
                    let satisfied = values.len() == 1 && acceptable(values[0]);
                    if !satisfied {
                        if policy == CorsPolicy::On {
                            self.log.add(
                                Finding::new(
                                    opts.failure_code,
                                    class,
                                    "missing or invalid cors header",
                                )
                                .with("url", address.clone())
                                .with("header", header),
                            );
                            return None;
                        }
                        self.log.add(
                            Finding::new(Kind::Err, class, "missing or invalid cors header")
                                .with("url", address.clone())
                                .with("header", header),
                        );
                        listed = None;
                    }
                }
            }
        }

        // ── TLS posture ───────────────────────────────────────────────
        let mut host_records: Vec<HostRecord> = hosts
            .iter()
            .map(|h| HostRecord {
                ip_address: h.ip_address.clone(),
                organization: h.organization.clone(),
                country: h.country.clone(),
                tls_versions: None,
            })
            .collect();
        if opts.modern_tls {
            let port = parsed.port_or_known_default().unwrap_or(443);
            let mut warned: HashSet<String> = HashSet::new();
            for record in &mut host_records {
                match self
                    .v
                    .tls
                    .enabled_versions(&address, &record.ip_address, port)
                    .await
                {
                    Ok(versions) => {
                        for version in &versions {
                            if !MODERN_TLS_VERSIONS.contains(&version.as_str())
                                && warned.insert(version.clone())
                            {
                                self.log.add(
                                    Finding::new(Kind::Warn, class, "obsolete tls version enabled")
                                        .with("url", address.clone())
                                        .with("protocol", version.clone()),
                                );
                            }
                        }
                        record.tls_versions = Some(versions);
                    }
                    Err(e) => {
                        tracing::debug!(url = %address, error = %e, "tls scan unavailable");
                    }
                }
            }
        }

        // ── Body parse ────────────────────────────────────────────────
        let mut body_json: Option<Value> = None;
        match opts.content_type {
            ContentTypeRule::Json => {
                let mut bytes = envelope.body.as_slice();
                if bytes.starts_with(&UTF8_BOM) {
                    self.log.add(
                        Finding::new(Kind::Err, class, "byte order mark at start of json body")
                            .with("url", address.clone()),
                    );
                    bytes = &bytes[UTF8_BOM.len()..];
                }
                match serde_json::from_slice::<Value>(bytes) {
                    Ok(value) => body_json = Some(value),
                    Err(e) => {
                        self.log.add(
                            Finding::new(Kind::Crit, class, "body is not valid json")
                                .with("url", address)
                                .with("error", e.to_string()),
                        );
                        return None;
                    }
                }
            }
            ContentTypeRule::PngJpg => {
                if !looks_like_png_or_jpeg(&envelope.body) {
                    self.log.add(
                        Finding::new(Kind::Err, class, "body is not a png or jpeg image")
                            .with("url", address),
                    );
                    return None;
                }
            }
            ContentTypeRule::Svg => {
                if !envelope.body_str().contains("<svg") {
                    self.log.add(
                        Finding::new(Kind::Err, class, "body is not an svg document")
                            .with("url", address),
                    );
                    return None;
                }
            }
            ContentTypeRule::Html | ContentTypeRule::Any => {}
        }

        // ── Extra check ───────────────────────────────────────────────
        let mut entry_info = Map::new();
        if let Some(check) = opts.extra_check {
            let outcome = match check {
                ExtraCheck::Api { ssl } => {
                    self.api_extra_check(&address, ssl, body_json.as_ref(), class).await
                }
                ExtraCheck::History => self.history_extra_check(&address, class).await,
                ExtraCheck::Hyperion => {
                    self.hyperion_extra_check(&address, body_json.as_ref(), class).await
                }
                ExtraCheck::Wallet => {
                    self.wallet_extra_check(&address, body_json.as_ref(), class).await
                }
            };
            if !outcome.passed {
                return None;
            }
            entry_info = outcome.info;
            if let Some((from, to)) = outcome.list_rename {
                listed = listed.map(|list| list.replace(from, to));
            }
        }

        // ── Accept ────────────────────────────────────────────────────
        self.log
            .add(Finding::new(Kind::Ok, class, "valid url").with("url", address.clone()));

        if let Some(list) = listed {
            let entry = ResourceEntry {
                address: address.clone(),
                hosts: Some(host_records),
                node_type: opts.node_type.clone(),
                location: opts.location.clone(),
                info: if entry_info.is_empty() {
                    None
                } else {
                    Some(Value::Object(entry_info))
                },
                response: None,
            };
            self.report.add_resource(&list, entry);
        }

        Some(UrlOutcome {
            envelope,
            body_json,
            address,
        })
    }
}

fn looks_like_png_or_jpeg(body: &[u8]) -> bool {
    const PNG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    body.starts_with(&PNG) || body.starts_with(&[0xFF, 0xD8, 0xFF])
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrub_collapses_path_slashes() {
        let scrubbed = scrub_url("https://example.net/a//b///c");
        assert_eq!(scrubbed.address, "https://example.net/a/b/c");
        assert!(scrubbed.collapsed_slashes);
    }

    #[test]
    fn scrub_strips_trailing_slash() {
        let scrubbed = scrub_url("https://example.net/api/");
        assert_eq!(scrubbed.address, "https://example.net/api");
        assert!(scrubbed.stripped_trailing_slash);

        let bare = scrub_url("https://example.net/");
        assert_eq!(bare.address, "https://example.net");
        assert!(bare.stripped_trailing_slash);
    }

    #[test]
    fn scrub_strips_default_ports_only() {
        assert_eq!(
            scrub_url("https://example.net:443/x").address,
            "https://example.net/x"
        );
        assert_eq!(
            scrub_url("http://example.net:80").address,
            "http://example.net"
        );
        assert_eq!(
            scrub_url("https://example.net:8443/x").address,
            "https://example.net:8443/x"
        );
    }

    #[test]
    fn scrub_leaves_clean_urls_alone() {
        let scrubbed = scrub_url("https://example.net/bp.json");
        assert_eq!(scrubbed.address, "https://example.net/bp.json");
        assert!(!scrubbed.collapsed_slashes);
        assert!(!scrubbed.stripped_trailing_slash);
    }

    #[test]
    fn hard_reject_localhost_and_loopback() {
        assert!(hard_reject("http://localhost/x", "localhost").is_some());
        assert!(hard_reject("http://127.0.0.1/x", "127.0.0.1").is_some());
        assert!(hard_reject("https://example.net", "example.net").is_none());
    }

    #[test]
    fn hard_reject_placeholder_urls_with_reason() {
        let reason = hard_reject("https://google.com/", "google.com").expect("rejected");
        assert!(reason.contains("example value"));
    }

    #[test]
    fn cors_origin_accepts_wildcard_only() {
        assert!(cors_origin_acceptable("*"));
        assert!(cors_origin_acceptable(" * "));
        assert!(!cors_origin_acceptable("https://example.net"));
        assert!(!cors_origin_acceptable(""));
    }

    #[test]
    fn cors_headers_accepts_wildcard_or_full_list() {
        assert!(cors_headers_acceptable("*"));
        assert!(cors_headers_acceptable("Content-Type, Origin, Accept"));
        assert!(cors_headers_acceptable("accept,origin,content-type,x-extra"));
        assert!(!cors_headers_acceptable("Content-Type, Origin"));
    }

    #[test]
    fn image_sniffing() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let jpg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0];
        assert!(looks_like_png_or_jpeg(&png));
        assert!(looks_like_png_or_jpeg(&jpg));
        assert!(!looks_like_png_or_jpeg(b"<html></html>"));
    }
}
