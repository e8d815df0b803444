//! Built-in step kinds.
//!
//! - [`contract`] - deploy an artifact, producing `contracts.<label>`
//! - [`invoke`] - call contract methods, producing `txns.<label>` plus any
//!   factory contracts and extracted event values
//! - [`import`] - expose another package's outputs under `imports.<label>`
//! - [`run`] - run an external command that reports its own artifacts
//! - [`var`] - named template values under `extras`

pub mod contract;
pub mod import;
pub mod invoke;
pub mod run;
pub mod var;

pub use contract::ContractAction;
pub use import::ImportAction;
pub use invoke::InvokeAction;
pub use run::RunAction;
pub use var::VarAction;
