//! handlers/mod.rs
//! Módulo que agrupa los handlers HTTP (seguimiento, resultados, campañas).
pub mod campaign_handler;
pub mod result_handler;
pub mod tracking_handler;
