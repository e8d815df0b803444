//! Library-level tests: builds, publishing and imports working together
//! through the public API only.

mod pipeline_tests;
