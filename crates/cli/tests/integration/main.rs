//! End-to-end tests of the `chainbuild` binary against a simulated chain.

mod common;

mod archive_tests;
mod build_tests;
mod gc_tests;
mod publish_tests;
