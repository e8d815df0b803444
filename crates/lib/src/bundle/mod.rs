//! Deployment bundles: the stored, published and archived result of a build.

pub mod diff;
mod types;

pub use diff::{AddressChange, BundleDiff, diff_bundles};
pub use types::*;
