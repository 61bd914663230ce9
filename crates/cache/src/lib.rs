//! # Probe-Result Cache Store
//!
//! Persistent key/value tables for expensive side-channel results, shared by
//! every validator instance on the host:
//!
//! - `tls`: enabled TLS versions per `(url, ip, port)` fingerprint
//! - `whois`: parsed WHOIS field map per IP address
//! - `http`: response envelopes keyed by request fingerprint
//!
//! Each record carries `checked_at`; the caller supplies the freshness window
//! on read, so one table serves probes with different TTL policies. Writes
//! are row-scoped upserts with last-writer-wins semantics — there are no
//! cross-key invariants, which keeps concurrent validators safe on a single
//! LMDB environment.

use std::path::Path;

use chrono::Utc;
use lmdb::{Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Map size for the cache environment. Response bodies dominate; 2 GiB of
/// address space is plenty and costs nothing until used.
const CACHE_MAP_SIZE: usize = 2 << 30;

// ════════════════════════════════════════════════════════════════════════════════
// ERRORS
// ════════════════════════════════════════════════════════════════════════════════

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("lmdb error: {0}")]
    Lmdb(#[from] lmdb::Error),

    #[error("cache record serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("failed to create cache directory: {0}")]
    Io(#[from] std::io::Error),
}

// ════════════════════════════════════════════════════════════════════════════════
// TABLES
// ════════════════════════════════════════════════════════════════════════════════

/// The three logical cache tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTable {
    Tls,
    Whois,
    Http,
}

impl CacheTable {
    const fn db_name(self) -> &'static str {
        match self {
            CacheTable::Tls => "tls",
            CacheTable::Whois => "whois",
            CacheTable::Http => "http",
        }
    }
}

/// Stored envelope: the cached value plus its write timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRecord {
    /// Unix seconds at write time.
    pub checked_at: i64,
    pub value: Value,
}

// ════════════════════════════════════════════════════════════════════════════════
// STORE
// ════════════════════════════════════════════════════════════════════════════════

/// LMDB-backed cache store. Cheap to share behind an `Arc`; reads and writes
/// are independent row transactions.
pub struct CacheStore {
    env: Environment,
    db_tls: Database,
    db_whois: Database,
    db_http: Database,
}

impl CacheStore {
    /// Open (or create) the cache environment at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(path)?;
        let env = Environment::new()
            .set_max_dbs(3)
            .set_map_size(CACHE_MAP_SIZE)
            .open(path)?;
        let db_tls = env.create_db(Some(CacheTable::Tls.db_name()), DatabaseFlags::empty())?;
        let db_whois = env.create_db(Some(CacheTable::Whois.db_name()), DatabaseFlags::empty())?;
        let db_http = env.create_db(Some(CacheTable::Http.db_name()), DatabaseFlags::empty())?;
        Ok(Self {
            env,
            db_tls,
            db_whois,
            db_http,
        })
    }

    const fn db(&self, table: CacheTable) -> Database {
        match table {
            CacheTable::Tls => self.db_tls,
            CacheTable::Whois => self.db_whois,
            CacheTable::Http => self.db_http,
        }
    }

    /// Fetch a record regardless of age.
    pub fn get_record(&self, table: CacheTable, key: &str) -> Result<Option<CachedRecord>, CacheError> {
        let rtxn = self.env.begin_ro_txn()?;
        match rtxn.get(self.db(table), &key.as_bytes()) {
            Ok(bytes) => {
                let record: CachedRecord = serde_json::from_slice(bytes)?;
                Ok(Some(record))
            }
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a record's value iff it is no older than `ttl_secs`.
    pub fn get_fresh(
        &self,
        table: CacheTable,
        key: &str,
        ttl_secs: i64,
    ) -> Result<Option<Value>, CacheError> {
        match self.get_record(table, key)? {
            Some(record) if Utc::now().timestamp() - record.checked_at <= ttl_secs => {
                Ok(Some(record.value))
            }
            _ => Ok(None),
        }
    }

    /// Upsert a record stamped with the current time. Replaces any previous
    /// record for the key in place.
    pub fn put(&self, table: CacheTable, key: &str, value: &Value) -> Result<(), CacheError> {
        self.put_at(table, key, value, Utc::now().timestamp())
    }

    /// Upsert with an explicit `checked_at`. Exposed for tests exercising
    /// freshness windows.
    pub fn put_at(
        &self,
        table: CacheTable,
        key: &str,
        value: &Value,
        checked_at: i64,
    ) -> Result<(), CacheError> {
        let record = CachedRecord {
            checked_at,
            value: value.clone(),
        };
        let encoded = serde_json::to_vec(&record)?;
        let mut wtxn = self.env.begin_rw_txn()?;
        wtxn.put(self.db(table), &key.as_bytes(), &encoded, WriteFlags::empty())?;
        wtxn.commit()?;
        Ok(())
    }
}

/// Deterministic fingerprint for compound cache keys: SHA-256 over the parts
/// joined with `|`, as lowercase hex.
#[must_use]
pub fn fingerprint_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
