//! srctool manages language parser plugins and runs them on projects.
//!
//! Plugins are downloaded from a server publishing an `MD5SUMS` catalog,
//! verified, and installed under `<data-dir>/parsers/plugin-<name>/`. The
//! `parse` operation runs every installed plugin concurrently on a project
//! and merges their JSON outputs into one model.
//!
//! ```text
//!  catalog ─┐
//!           ├─ transfer ─ integrity ─┐
//!  platform ┘                        ├─ lifecycle (install/update/uninstall)
//!  storage ─── registry ─────────────┤
//!                                    └─ orchestrator ─ model (parse/merge)
//! ```

pub mod catalog;
pub mod cli;
pub mod error;
pub mod integrity;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod platform;
pub mod registry;
pub mod storage;
pub mod transfer;

pub use error::{Result, SrctoolError};
pub use lifecycle::{BatchReport, LifecycleManager, UninstallOutcome, UpdateOutcome};
pub use model::{JsonProject, ProjectModel};
pub use orchestrator::Orchestrator;
pub use platform::{Platform, PluginName};
pub use registry::{InstallState, Plugin, Registry};
pub use storage::{Config, Storage};
pub use transfer::TransferClient;
