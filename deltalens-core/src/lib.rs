//! # deltalens-core
//!
//! Core library for deltalens - a period-over-period behavioral insights engine.
//!
//! This library provides:
//! - Query types and the criteria/funnel matcher
//! - Within-period aggregation, two-pass feature selection and cross-period diffs
//! - A KPI engine over events, ad-channel documents and profile records
//! - Snapshot storage (JSON files or SQLite)
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Each query is evaluated over two equal-length windows:
//! - **Matching:** a user's time-ordered events are sessionized and matched
//!   against the query's criteria
//! - **Within period:** matched users are aggregated into feature
//!   distributions; pass 1 discovers the top-K values, pass 2 recounts only the
//!   whitelisted ones
//! - **Cross period:** the two snapshots are diffed into changes, delta
//!   ratios and Jensen-Shannon divergences
//!
//! KPIs skip the matcher and accumulate every qualifying record directly.
//!
//! ## Example
//!
//! ```rust,no_run
//! use deltalens_core::pipeline::{Job, Pipeline};
//! use deltalens_core::{store, Config, DirectorySource};
//!
//! let config = Config::load().expect("failed to load config");
//! let settings = config.settings();
//! let source = DirectorySource::new(Config::data_dir().join("records"));
//! let store = store::open(&config.store).expect("failed to open store");
//!
//! let job = Job::from_json(br#"{"project_id": 1, "start": 0, "end": 604799, "mailer": true}"#)
//!     .expect("invalid job");
//! let summary = Pipeline::new(&source, store.as_ref(), &settings)
//!     .run(&job, chrono::Utc::now().timestamp())
//!     .expect("run failed");
//! println!("{} units, {} failed", summary.units.len(), summary.failed());
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, InsightsSettings};
pub use error::{Error, Result};
pub use pipeline::{Job, Pipeline, RunSummary};
pub use query::{KpiQueryGroup, MultiFunnelQuery, Query, QueryShape};
pub use source::{DirectorySource, RecordSource};
pub use store::{SnapshotKey, SnapshotKind, SnapshotStore};
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod insights;
pub mod kpi;
pub mod logging;
pub mod matcher;
pub mod pipeline;
pub mod query;
pub mod source;
pub mod store;
pub mod types;
