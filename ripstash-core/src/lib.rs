//! # ripstash-core
//!
//! Core pipeline for the ripstash disc-ripping coordinator: the rip-job
//! state machine, the content-addressed blob store, the subtitle-based
//! identification engine and the export projection layer, plus the
//! adapters they consume (analysis CLI, TMDB, subtitle provider).
//!
//! The wire transports (controller RPC, user-facing API) live outside
//! this crate; they drive the [`coordinator::Coordinator`] through its
//! public operations and implement [`coordinator::DriveControllerClient`]
//! for the outbound side.

pub mod analysis;
pub mod blobs;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod exports;
pub mod identify;
pub mod providers;

pub use blobs::BlobStore;
pub use catalog::{CatalogSession, CatalogStore};
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{CoreError, Result};
pub use exports::ExportProjector;
