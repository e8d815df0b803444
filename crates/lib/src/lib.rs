//! chainbuild-lib: Core types and logic for chainbuild
//!
//! This crate provides the declarative deployment builder:
//! - `definition`: chain definitions, a DAG of named steps
//! - `action`: the step kinds and the registry that dispatches them
//! - `build`: incremental, fingerprinted build execution
//! - `bundle`: the deployment bundle a build produces
//! - `storage` / `registry`: content-addressed bundles and the package
//!   names that point at them
//! - `archive`: portable export and import of bundles

pub mod action;
pub mod archive;
pub mod build;
pub mod bundle;
pub mod config;
pub mod consts;
pub mod definition;
pub mod gc;
pub mod multicall;
pub mod platform;
pub mod provider;
pub mod reference;
pub mod registry;
pub mod storage;
pub mod store_lock;
pub mod template;
pub mod util;
