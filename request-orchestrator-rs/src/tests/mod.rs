//! Unit tests for the request orchestrator
//!
//! Component tests live next to each other here; the HTTP-facing ones run
//! against a wiremock backend.

pub mod support;
pub mod interpreter_tests;
pub mod translator_tests;
pub mod executor_tests;
pub mod orchestrator_tests;
