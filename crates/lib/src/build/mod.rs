//! Build planning and execution.
//!
//! A build walks a [`ChainDefinition`](crate::definition::ChainDefinition)
//! in dependency order and produces a
//! [`DeploymentBundle`](crate::bundle::DeploymentBundle). Builds are
//! incremental: each step's fingerprint covers its resolved config and the
//! state of everything it depends on, and steps whose fingerprint matches the
//! prior bundle are reused instead of executed.
//!
//! # Submodules
//!
//! - `context` - values templates see while a build runs
//! - `engine` - wave scheduler and fingerprint/skip logic
//! - `plan` - dry-run prediction of a build
//! - [`index`] - latest local build per package

mod context;
mod engine;
pub mod index;
mod plan;
mod types;

pub use context::{BuildContext, artifacts_scope};
pub use engine::build;
pub use plan::{BuildPlan, PlanAction, PlanReason, PlannedNode, plan_build};
pub use types::*;
