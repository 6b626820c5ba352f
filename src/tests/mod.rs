//! tests/mod.rs
//! Escenarios de punta a punta sobre una base SQLite temporal.

mod scheduler_tests;
mod support;
