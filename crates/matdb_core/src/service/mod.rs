//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate parser, repositories, and the override resolver into
//!   use-case level APIs.
//! - Keep CLI/GUI collaborators decoupled from storage details.

pub mod override_service;
pub mod record_service;
pub mod reference_service;
