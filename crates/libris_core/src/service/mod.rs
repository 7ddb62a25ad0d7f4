//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Translate repository errors into per-use-case error enums.
//! - Host the borrowing coordinator and the notification pipeline.

pub mod borrowing_service;
pub mod catalog_service;
pub mod delivery;
pub mod dispatcher;
pub mod payment_service;
pub mod sweeper;
