//! bp.json discovery and schema validation.
//!
//! chains.json lets multi-chain producers point each chain id at its own
//! file; without it the chain profile's default filename applies. The schema
//! walk then checks each declared field the way operators actually get them
//! wrong: missing fields, absolute social handles, lowercase country codes,
//! dead links.

use serde_json::Value;

use bpscan_common::config::{social_prefix, ContentTypeRule};
use bpscan_common::findings::{Class, Finding, Kind};
use bpscan_probe::{HttpRequest, RequestOpts};

use crate::url_check::UrlOptions;
use crate::Run;

/// Social references below this count earn an `err`.
const MIN_SOCIAL_REFERENCES: usize = 4;

/// Long freshness window for organizational pages that rarely change.
const ORG_PAGE_CACHE_SECS: i64 = 7 * 24 * 3600;

fn join_path(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl Run<'_> {
    /// Fetch chains.json and resolve the bp.json URL for this chain.
    pub(crate) async fn discover_bpjson_url(&mut self, home_url: &str) -> String {
        let chains_url = join_path(home_url, "chains.json");
        let request = HttpRequest::get(&chains_url);
        let opts = RequestOpts {
            cache_timeout_secs: 600,
            ..RequestOpts::default()
        };
        let envelope = self
            .v
            .http
            .request(&request, &opts, &mut self.log, Class::Chains)
            .await;

        if envelope.ok() {
            match serde_json::from_slice::<Value>(&envelope.body) {
                Ok(doc) => {
                    let mapped = doc
                        .get("chains")
                        .and_then(|chains| chains.get(&self.chain.chain_id))
                        .and_then(Value::as_str);
                    match mapped {
                        Some(path) => {
                            self.log.add(
                                Finding::new(Kind::Ok, Class::Chains, "chains.json lists this chain")
                                    .with("path", path),
                            );
                            return join_path(home_url, path);
                        }
                        None => {
                            self.log.add(
                                Finding::new(
                                    Kind::Warn,
                                    Class::Chains,
                                    "chains.json does not list this chain",
                                )
                                .with("chain_id", self.chain.chain_id.clone()),
                            );
                        }
                    }
                }
                Err(e) => {
                    self.log.add(
                        Finding::new(Kind::Err, Class::Chains, "chains.json is not valid json")
                            .with("url", chains_url)
                            .with("error", e.to_string()),
                    );
                }
            }
        } else {
            self.log.add(Finding::new(
                Kind::Info,
                Class::Chains,
                "chains.json is not published",
            ));
        }

        join_path(home_url, &self.chain.filename)
    }

    /// Fetch and parse bp.json. A failure here is a `crit` and ends every
    /// post-schema check.
    pub(crate) async fn fetch_bpjson(&mut self, bpjson_url: &str) -> Option<Value> {
        let outcome = self
            .check_url(
                bpjson_url,
                UrlOptions::new(Class::Bpjson)
                    .content_type(ContentTypeRule::Json)
                    .cors_origin(crate::CorsPolicy::Should)
                    .cache(600),
            )
            .await?;
        outcome.body_json
    }

    /// Field-by-field schema validation. Returns whether the account-name
    /// gate passed; when it did not, the caller skips everything downstream.
    pub(crate) async fn check_schema(&mut self, doc: &Value) -> bool {
        // ── Account gate ──────────────────────────────────────────────
        match doc.get("producer_account_name").and_then(Value::as_str) {
            None => {
                self.log.add(Finding::new(
                    Kind::Crit,
                    Class::Bpjson,
                    "bp.json has no producer_account_name",
                ));
                return false;
            }
            Some(account) if account != self.regproducer.owner => {
                self.log.add(
                    Finding::new(
                        Kind::Crit,
                        Class::Bpjson,
                        "producer_account_name does not match the registration",
                    )
                    .with("expected", self.regproducer.owner.clone())
                    .with("received", account),
                );
                return false;
            }
            Some(_) => {
                self.log.add(Finding::new(
                    Kind::Ok,
                    Class::Bpjson,
                    "producer_account_name matches the registration",
                ));
            }
        }

        let org = doc.get("org").cloned().unwrap_or(Value::Null);
        if org.is_null() {
            self.log
                .add(Finding::new(Kind::Err, Class::Org, "bp.json has no org section"));
        } else {
            self.check_org(&org).await;
        }

        if doc.get("producer_public_key").is_some() {
            self.log.add(Finding::new(
                Kind::Info,
                Class::Bpjson,
                "producer_public_key is deprecated and ignored",
            ));
        }

        true
    }

    async fn check_org(&mut self, org: &Value) {
        // ── Candidate name ────────────────────────────────────────────
        match org.get("candidate_name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => {
                self.report.set_info("name", name);
                self.log.add(
                    Finding::new(Kind::Ok, Class::Org, "candidate name present")
                        .with("name", name),
                );
            }
            _ => {
                self.log.add(Finding::new(
                    Kind::Err,
                    Class::Org,
                    "org.candidate_name is missing",
                ));
            }
        }

        // ── Email ─────────────────────────────────────────────────────
        match org.get("email").and_then(Value::as_str) {
            Some(email) if !email.is_empty() => match email.split_once('@') {
                Some((user, domain)) if !user.is_empty() && !domain.is_empty() => {
                    if self.v.resolver.has_mx(domain).await {
                        self.log.add(
                            Finding::new(Kind::Ok, Class::Org, "email domain accepts mail")
                                .with("email", email),
                        );
                    } else {
                        self.log.add(
                            Finding::new(Kind::Err, Class::Org, "email domain has no mx records")
                                .with("email", email),
                        );
                    }
                }
                _ => {
                    self.log.add(
                        Finding::new(Kind::Err, Class::Org, "org.email is not an email address")
                            .with("email", email),
                    );
                }
            },
            _ => {
                self.log
                    .add(Finding::new(Kind::Err, Class::Org, "org.email is missing"));
            }
        }

        // ── Organizational pages ──────────────────────────────────────
        for field in ["website", "code_of_conduct", "ownership_disclosure"] {
            match org.get(field).and_then(Value::as_str) {
                Some(url) if !url.is_empty() => {
                    self.check_url(
                        url,
                        UrlOptions::new(Class::Org)
                            .content_type(ContentTypeRule::Html)
                            .failure_code(Kind::Err)
                            .cache(ORG_PAGE_CACHE_SECS)
                            .fast_fail(),
                    )
                    .await;
                }
                _ => {
                    self.log.add(
                        Finding::new(Kind::Err, Class::Org, "missing organization page")
                            .with("field", field),
                    );
                }
            }
        }

        // ── Branding ──────────────────────────────────────────────────
        let branding = org.get("branding").cloned().unwrap_or(Value::Null);
        for (field, rule) in [
            ("logo_256", ContentTypeRule::PngJpg),
            ("logo_1024", ContentTypeRule::PngJpg),
            ("logo_svg", ContentTypeRule::Svg),
        ] {
            match branding.get(field).and_then(Value::as_str) {
                Some(url) if !url.is_empty() => {
                    self.check_url(
                        url,
                        UrlOptions::new(Class::Org)
                            .content_type(rule)
                            .failure_code(Kind::Err)
                            .cache(ORG_PAGE_CACHE_SECS),
                    )
                    .await;
                }
                _ => {
                    self.log.add(
                        Finding::new(Kind::Err, Class::Org, "missing branding image")
                            .with("field", field),
                    );
                }
            }
        }

        // ── Location ──────────────────────────────────────────────────
        match org.get("location") {
            Some(location) => self.check_location_block(location, Class::Org, true),
            None => {
                self.log
                    .add(Finding::new(Kind::Err, Class::Org, "org.location is missing"));
            }
        }

        self.check_social(org).await;
    }

    async fn check_social(&mut self, org: &Value) {
        let Some(social) = org.get("social").and_then(Value::as_object) else {
            self.log
                .add(Finding::new(Kind::Err, Class::Org, "org.social is missing"));
            return;
        };

        let mut valid = 0usize;
        for (key, value) in social {
            let Some(handle) = value.as_str() else {
                self.log.add(
                    Finding::new(Kind::Err, Class::Org, "social handle must be a string")
                        .with("social", key.as_str()),
                );
                continue;
            };

            let Some(prefix) = social_prefix(key) else {
                self.log.add(
                    Finding::new(Kind::Err, Class::Org, "unknown social service")
                        .with("social", key.as_str()),
                );
                continue;
            };

            if handle.is_empty() {
                self.log.add(
                    Finding::new(Kind::Err, Class::Org, "social handle is empty")
                        .with("social", key.as_str()),
                );
                continue;
            }
            if handle.starts_with("http://") || handle.starts_with("https://") {
                self.log.add(
                    Finding::new(
                        Kind::Err,
                        Class::Org,
                        "social handle must be relative, not a url",
                    )
                    .with("social", key.as_str())
                    .with("handle", handle),
                );
                continue;
            }
            if handle.starts_with('@') {
                self.log.add(
                    Finding::new(Kind::Err, Class::Org, "social handle must not start with @")
                        .with("social", key.as_str())
                        .with("handle", handle),
                );
                continue;
            }

            match prefix {
                // No canonical URL to probe; accept the handle as given.
                None => {
                    self.log.add(
                        Finding::new(Kind::Ok, Class::Org, "social reference accepted")
                            .with("social", key.as_str())
                            .with("handle", handle),
                    );
                    valid += 1;
                }
                Some(prefix) => {
                    let url = format!("{prefix}{handle}");
                    let mut opts = UrlOptions::new(Class::Org)
                        .content_type(ContentTypeRule::Html)
                        .failure_code(Kind::Err)
                        .cache(ORG_PAGE_CACHE_SECS)
                        .fast_fail();
                    // Keybase profiles only resolve with a trailing slash;
                    // request it without dirtying the canonical address.
                    if key == "keybase" {
                        opts = opts.url_ext("/");
                    }
                    if self.check_url(&url, opts).await.is_some() {
                        valid += 1;
                    }
                }
            }
        }

        if valid < MIN_SOCIAL_REFERENCES {
            self.log.add(
                Finding::new(Kind::Err, Class::Org, "fewer than 4 valid social references")
                    .with("valid", valid),
            );
        }
    }
}
