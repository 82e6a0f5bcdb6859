//! Functional test runner.
//!
//! Discovers `test_*` functions in a case's `tests.py` and runs each one in
//! isolation against the generated artifact.

pub mod runner;
pub mod suite;

pub use runner::{FunctionalTestRunner, TestCaseResult, TestResult, SERVER_PORT_ENV};
pub use suite::{discover_tests, DiscoveredTest, TestSuite};
