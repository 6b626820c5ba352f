//! config/mod.rs
pub mod delivery_config;
