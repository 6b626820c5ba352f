//! services/mod.rs
//! Módulo que agrupa los servicios del motor: almacenes, máquina de estados,
//! canales, workers y scheduler.

pub mod backoff;
pub mod campaign_service;
pub mod channel_service;
pub mod chat_service;
pub mod context_cache;
pub mod delivery_worker;
pub mod entry_service;
pub mod event_service;
pub mod message_service;
pub mod outcome_service;
pub mod result_locks;
pub mod result_service;
pub mod scheduler_service;
pub mod smtp_service;
pub mod template_service;
pub mod tracking_service;
