//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod campaign_model;
pub mod entry_model;
pub mod event_model;
pub mod result_model;
pub mod tracking_model;
