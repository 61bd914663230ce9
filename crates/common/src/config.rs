//! Collaborator inputs and immutable lookup tables.
//!
//! The crawler hands each validation a regproducer row, the chain profile it
//! was registered under, a rank/meta object and the server-version catalog.
//! All of these are read-only for the lifetime of the run.
//!
//! The content-type whitelist, social-prefix table and bad-URL blacklist are
//! fixed configuration values loaded at startup; nothing mutates them at
//! runtime.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ════════════════════════════════════════════════════════════════════════════════
// REGPRODUCER
// ════════════════════════════════════════════════════════════════════════════════

/// On-chain producer registration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegProducer {
    /// Producer account name.
    pub owner: String,
    /// Configured home URL.
    pub url: String,
    /// Producer signing key.
    pub producer_key: String,
    pub is_active: bool,
    /// Chain-specific numeric location (country code or timezone slot).
    #[serde(default)]
    pub location: u32,
    #[serde(default)]
    pub unpaid_blocks: u64,
    /// ISO-like timestamp of the last `claimrewards`, empty if never.
    #[serde(default)]
    pub last_claim_time: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// CHAIN PROFILE
// ════════════════════════════════════════════════════════════════════════════════

/// How the numeric `regproducer.location` field is interpreted on this chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationCheck {
    /// ISO-3166-1 numeric country code.
    Country,
    /// UTC offset slot, 0–23.
    Timezone,
    /// UTC offset slot multiplied by 100, 0–2399.
    Timezone100,
}

/// Static per-chain configuration profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainProperties {
    /// Expected chain id reported by `/v1/chain/get_info`.
    pub chain_id: String,
    /// Default bp.json filename when chains.json does not override it.
    pub filename: String,
    pub location_check: LocationCheck,
    /// A known transaction id used by the history sub-suites.
    pub test_transaction: String,
    /// A public key with known on-chain accounts.
    pub test_public_key: String,
    /// An account with a known core-token balance.
    pub test_account: String,
    pub core_symbol: String,
    /// Endpoint used to resolve accounts for a signing key.
    pub key_accounts_url: String,
    /// Block id of a block large enough to stress the ABI serializer.
    pub test_big_block: String,
    /// Expected transaction count of `test_big_block`.
    pub big_block_transactions: usize,
    #[serde(default)]
    pub class_history: bool,
    #[serde(default)]
    pub class_hyperion: bool,
    #[serde(default)]
    pub class_wallet: bool,
    /// Aloha reliability tracker id; probe skipped when absent.
    #[serde(default)]
    pub aloha_id: Option<String>,
    /// Scope of the on-chain bp.json table.
    #[serde(default)]
    pub test_bpjson_scope: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// VERSION CATALOG
// ════════════════════════════════════════════════════════════════════════════════

/// Catalog entry for one canonical server version string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Human-readable release name.
    pub name: String,
    /// Whether this release is considered current.
    pub api_current: bool,
}

/// Map from canonical `server_version_string` to release metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionCatalog(pub BTreeMap<String, VersionInfo>);

impl VersionCatalog {
    #[must_use]
    pub fn lookup(&self, canonical: &str) -> Option<&VersionInfo> {
        self.0.get(canonical)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// META
// ════════════════════════════════════════════════════════════════════════════════

/// Rank/position object supplied by the crawler. Extra fields are preserved
/// verbatim into the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub is_top_21: bool,
    #[serde(default)]
    pub is_standby: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ════════════════════════════════════════════════════════════════════════════════
// IMMUTABLE TABLES
// ════════════════════════════════════════════════════════════════════════════════

/// Content-type labels accepted by the URL validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentTypeRule {
    /// No content-type restriction.
    #[default]
    Any,
    Json,
    PngJpg,
    Svg,
    Html,
}

impl ContentTypeRule {
    /// Whitelisted media types for this label. The match is performed on the
    /// lowercased media type with parameters stripped.
    #[must_use]
    pub fn allowed(self) -> &'static [&'static str] {
        match self {
            ContentTypeRule::Any => &[],
            ContentTypeRule::Json => &["application/json", "text/json"],
            ContentTypeRule::PngJpg => &["image/png", "image/jpeg", "image/jpg"],
            ContentTypeRule::Svg => &["image/svg+xml"],
            ContentTypeRule::Html => &["text/html", "application/xhtml+xml"],
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ContentTypeRule::Any => "any",
            ContentTypeRule::Json => "json",
            ContentTypeRule::PngJpg => "png_jpg",
            ContentTypeRule::Svg => "svg",
            ContentTypeRule::Html => "html",
        }
    }
}

/// Placeholder URLs copied straight out of documentation templates. Each
/// entry pairs the address with the fixed reason reported back.
pub const BAD_URLS: &[(&str, &str)] = &[
    ("https://google.com", "the example value from the documentation"),
    ("http://google.com", "the example value from the documentation"),
    ("https://example.com", "a placeholder address"),
    ("http://example.com", "a placeholder address"),
    ("https://yourwebsitename.com", "a placeholder address"),
];

/// Known social reference keys and their URL prefixes. Keys with no prefix
/// cannot be probed and are accepted as-is.
pub const SOCIAL_PREFIXES: &[(&str, Option<&str>)] = &[
    ("facebook", Some("https://www.facebook.com/")),
    ("github", Some("https://github.com/")),
    ("keybase", Some("https://keybase.io/")),
    ("medium", Some("https://medium.com/@")),
    ("reddit", None),
    ("steemit", Some("https://steemit.com/@")),
    ("telegram", Some("https://t.me/")),
    ("twitter", Some("https://twitter.com/")),
    ("wechat", None),
    ("youtube", Some("https://www.youtube.com/")),
];

/// Look up the prefix entry for a social key. `None` means the key itself is
/// unknown; `Some(None)` means known but not probeable.
#[must_use]
pub fn social_prefix(key: &str) -> Option<Option<&'static str>> {
    SOCIAL_PREFIXES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, prefix)| *prefix)
}
