//! Whole-program indirect-call resolution over a compiled intermediate
//! representation.
//!
//! A host loads its IR into the shapes in [`ir`] (one [`ir::Module`] per
//! compilation unit), builds an [`config::AnalysisConfig`], and hands both
//! to a [`driver::Driver`]. Running the driver to completion produces a
//! [`callgraph::CallGraph`]: every indirect call site's candidate callee
//! set, narrowed first by multi-layer type analysis ([`mlta`]) and then by
//! type-based per-module dependency pruning ([`typm`]).
//!
//! Loading real bitcode or textual IR into [`ir::Module`], walking a
//! pass-manager's module order, and reporting precision against ground
//! truth are all host concerns; this crate's contract with them is the
//! [`ir`] data model, the [`driver::ModulePassLifecycle`] trait, and the
//! optional [`trace`] loader, not an implementation of any of the three.

/// The IR data model the core consumes.
pub mod ir;

/// Structural type hashing and target/container classification.
pub mod hash;

/// Field-layer climbing (`nextLayerBaseType`).
pub mod layers;

/// Runtime analysis configuration and config-file loaders.
pub mod config;

/// Fatal configuration error conditions.
pub mod error;

/// The whole-program index built by one pass over every module.
pub mod index;

/// Multi-layer type analysis: indirect-call resolution.
pub mod mlta;

/// Type-based per-module dependency analysis.
pub mod typm;

/// Resolved call graph and per-phase summary counters.
pub mod callgraph;

/// The phase driver orchestrating initialization, MLTA, and TyPM.
pub mod driver;

/// Optional evaluation-trace loading, for precision reporting.
pub mod trace;

pub use crate::callgraph::{CallGraph, CallSite, CallSiteId, PhaseReport};
pub use crate::config::AnalysisConfig;
pub use crate::driver::Driver;
pub use crate::error::ConfigError;
