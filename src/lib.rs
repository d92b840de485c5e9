//! # Polyflow - Activity Execution Core for Polystore Workflows
//!
//! **Polyflow** runs workflows: directed acyclic graphs of *activities* connected by data
//! edges, which carry tables, documents or graphs, and control edges, which only order
//! execution. Before anything runs, every activity publishes a *type preview* of its
//! outputs so editors can validate a workflow while it is being built.
//!
//! ## Core Workflow
//!
//! 1.  **Register Activities**: Build an [`ActivityRegistry`](registry::ActivityRegistry)
//!     with the built-in activities and your own.
//! 2.  **Build a Workflow**: Add activities and connect them. Previews and settings are
//!     validated on every change.
//! 3.  **Run**: A [`WorkflowRunner`](engine::WorkflowRunner) schedules the activities on
//!     worker threads. Chains of compatible activities are fused into a single plan or
//!     pipelined without intermediate checkpoints.
//! 4.  **Inspect**: States, checkpoints, logs and variables of every activity stay
//!     available after the run.
//!
//! ## Quick Start
//!
//! ```rust
//! use polyflow::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let registry = ActivityRegistry::with_builtins()?;
//! let mut workflow = Workflow::default();
//!
//! let values = workflow.add_activity_model(
//!     &ActivityModel::new("relValues").with_setting("rowCount", serde_json::json!(20)),
//!     &registry,
//! )?;
//! let limit = workflow.add_activity_model(
//!     &ActivityModel::new("relLimit").with_setting("limit", serde_json::json!(5)),
//!     &registry,
//! )?;
//! workflow.connect(values, 0, limit, 0)?;
//!
//! let storage = Arc::new(InMemoryStorage::new());
//! let runner = WorkflowRunner::new(storage.clone(), EngineConfig::default());
//! let summary = runner.run(&mut workflow, None)?;
//!
//! assert!(summary.is_success());
//! assert_eq!(storage.checkpoint_rows(limit, 0).map(|rows| rows.len()), Some(5));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Type previews**: Outputs are described before execution and refined as settings,
//!   inputs and variables become known.
//! - **Strategies**: Activities run imperatively, as fused plans or as concurrent pipelines.
//!   The strategy is chosen per activity from its capabilities.
//! - **Edge states**: Failures and skipped branches propagate through data and control
//!   edges following configurable merge rules.
//! - **Variables**: Activities can publish variables that settings of successors reference.

pub mod activities;
pub mod activity;
pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod model;
pub mod plan;
pub mod prelude;
pub mod registry;
pub mod settings;
pub mod storage;
pub mod types;
pub mod value;
pub mod variables;
