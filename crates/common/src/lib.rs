//! # bpscan Common Crate
//!
//! Shared data model for the bpscan block-producer validator.
//!
//! ## Modules
//! - `findings`: classified finding stream every probe reports into
//! - `dupes`: per-run duplicate URL/peer registry
//! - `config`: collaborator inputs (regproducer row, chain profile,
//!   version catalog) and the immutable lookup tables
//! - `countries`: embedded ISO-3166-1 table
//! - `report`: the report document returned by one validation

pub mod config;
pub mod countries;
pub mod dupes;
pub mod findings;
pub mod report;

pub use config::{ChainProperties, LocationCheck, Meta, RegProducer, VersionCatalog, VersionInfo};
pub use dupes::DupeRegistry;
pub use findings::{Class, Finding, FindingLog, Kind};
pub use report::{HostRecord, Report, ResourceEntry};
