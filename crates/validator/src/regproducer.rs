//! Registration-level checks: the preamble of every run.
//!
//! These run before anything derived from bp.json: URL syntax of the
//! registered home page, signing-key hygiene, the claim-rewards window, and
//! the Aloha reliability lookup.

use chrono::{Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;
use url::Url;

use bpscan_common::config::ContentTypeRule;
use bpscan_common::findings::{Class, Finding, Kind};
use bpscan_probe::{HttpRequest, RequestOpts};

use crate::api::parse_chain_time;
use crate::url_check::UrlOptions;
use crate::Run;

/// Reliability tracker endpoint. Fixed; tests intercept it at the transport.
const ALOHA_ENDPOINT: &str = "https://www.alohaeos.com/api/v1/producer/get";

/// Grace window for claim rewards: one day plus scheduling slack.
const CLAIM_WINDOW_SECS: i64 = 24 * 3600 + 30;

impl Run<'_> {
    /// Syntax check of the registered URL. Returns the usable home URL, or
    /// `None` after a `crit` — the caller ends the run early.
    pub(crate) fn check_regproducer_url(&mut self) -> Option<String> {
        let raw = self.regproducer.url.trim().to_string();
        let parseable = (raw.starts_with("http://") || raw.starts_with("https://"))
            && Url::parse(&raw)
                .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
                .unwrap_or(false);
        if !parseable {
            self.log.add(
                Finding::new(Kind::Crit, Class::Regproducer, "invalid configured url")
                    .with("url", raw),
            );
            return None;
        }
        Some(raw)
    }

    /// The registered signing key must not belong to an account.
    ///
    /// An unavailable key-accounts endpoint is treated as a pass: this check
    /// depends on third-party infrastructure and must not penalize the
    /// producer for its outages.
    pub(crate) async fn check_regproducer_key(&mut self) {
        let request = HttpRequest::post_json(
            &self.chain.key_accounts_url,
            &serde_json::json!({"public_key": self.regproducer.producer_key}),
        );
        let opts = RequestOpts {
            cache_timeout_secs: 300,
            suppress_timeout_message: true,
            ..RequestOpts::default()
        };
        let envelope = self
            .v
            .http
            .request(&request, &opts, &mut self.log, Class::Regproducer)
            .await;
        if !envelope.ok() {
            warn!(
                url = %self.chain.key_accounts_url,
                code = envelope.code,
                "key accounts endpoint unavailable, skipping signing key check"
            );
            return;
        }

        let accounts = serde_json::from_slice::<Value>(&envelope.body)
            .ok()
            .and_then(|body| {
                body.get("account_names")
                    .and_then(Value::as_array)
                    .cloned()
            })
            .unwrap_or_default();
        if accounts.is_empty() {
            self.log.add(Finding::new(
                Kind::Ok,
                Class::Regproducer,
                "signing key is not in use by an account",
            ));
        } else {
            self.log.add(
                Finding::new(
                    Kind::Err,
                    Class::Regproducer,
                    "signing key is in use by an account, use a dedicated signing key",
                )
                .with("accounts", Value::Array(accounts)),
            );
        }
    }

    /// Producers with unpaid blocks must claim rewards daily.
    pub(crate) fn check_claim_rewards(&mut self) {
        if self.regproducer.unpaid_blocks == 0 {
            self.log.add(Finding::new(
                Kind::Ok,
                Class::Regproducer,
                "no unpaid blocks",
            ));
            return;
        }

        match parse_chain_time(&self.regproducer.last_claim_time) {
            Some(last_claim) => {
                let age = Utc::now().signed_duration_since(last_claim).num_seconds();
                if age < CLAIM_WINDOW_SECS {
                    self.log.add(Finding::new(
                        Kind::Ok,
                        Class::Regproducer,
                        "rewards claimed within the last day",
                    ));
                } else {
                    self.log.add(
                        Finding::new(
                            Kind::Err,
                            Class::Regproducer,
                            "rewards have not been claimed within the last day",
                        )
                        .with("last_claim_time", self.regproducer.last_claim_time.clone()),
                    );
                }
            }
            None => {
                self.log.add(
                    Finding::new(Kind::Err, Class::Regproducer, "invalid last claim time")
                        .with("last_claim_time", self.regproducer.last_claim_time.clone()),
                );
            }
        }
    }

    /// The registered home page must serve an HTML document.
    pub(crate) async fn check_home_page(&mut self, home_url: &str) {
        self.check_url(
            home_url,
            UrlOptions::new(Class::Regproducer)
                .content_type(ContentTypeRule::Html)
                .failure_code(Kind::Err)
                .cache(3600),
        )
        .await;
    }

    /// Aloha reliability lookup: recent missed rounds are worth a warning.
    pub(crate) async fn check_aloha(&mut self) {
        let Some(aloha_id) = self.chain.aloha_id.clone() else {
            return;
        };

        let request = HttpRequest::post_form(ALOHA_ENDPOINT, format!("producer={aloha_id}"));
        let opts = RequestOpts {
            cache_timeout_secs: 3600,
            suppress_timeout_message: true,
            ..RequestOpts::default()
        };
        let envelope = self
            .v
            .http
            .request(&request, &opts, &mut self.log, Class::Regproducer)
            .await;
        if !envelope.ok() {
            self.log.add(Finding::new(
                Kind::Skip,
                Class::Regproducer,
                "reliability tracker unavailable",
            ));
            return;
        }

        let body = serde_json::from_slice::<Value>(&envelope.body).unwrap_or(Value::Null);
        let last_missed = body
            .get("producer")
            .and_then(|p| p.get("last_missed_round"))
            .and_then(Value::as_str)
            .unwrap_or("");

        if last_missed.is_empty() {
            self.report.set_info("last_missed_round", "never");
            self.log.add(
                Finding::new(Kind::Ok, Class::Regproducer, "never missed a round")
                    .with("last_missed_round", "never"),
            );
            return;
        }

        match NaiveDateTime::parse_from_str(last_missed, "%Y-%m-%d %H:%M:%S") {
            Ok(naive) => {
                let missed_at = Utc.from_utc_datetime(&naive);
                self.report.set_info("last_missed_round", last_missed);
                if Utc::now().signed_duration_since(missed_at) < ChronoDuration::days(30) {
                    self.log.add(
                        Finding::new(
                            Kind::Warn,
                            Class::Regproducer,
                            "missed a production round within the last month",
                        )
                        .with("last_missed_round", last_missed),
                    );
                } else {
                    self.log.add(
                        Finding::new(Kind::Ok, Class::Regproducer, "no recently missed rounds")
                            .with("last_missed_round", last_missed),
                    );
                }
            }
            Err(_) => {
                self.log.add(
                    Finding::new(
                        Kind::Err,
                        Class::Regproducer,
                        "unparseable reliability data",
                    )
                    .with("last_missed_round", last_missed),
                );
            }
        }
    }
}
