//! Maintenance of the master doctor search index.
//!
//! Aggregates facts about a doctor from four independent source systems into one
//! denormalized search document, so consumers query a single index instead of joining
//! across sources at read time. Two subsystems do the work:
//!
//! - the [`cdc`] module consumes change-data-capture events from the source queues
//!   and merges them into the index through the [`repository`], publishing refreshed
//!   views via [`publish`];
//! - the [`index`] module wraps the search engine and rebuilds the index behind its
//!   alias with zero read downtime.

pub mod cdc;
pub mod config;
pub mod conversions;
pub mod error;
pub mod index;
pub mod publish;
pub mod repository;
pub mod types;

mod macros;
