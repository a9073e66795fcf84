//! Business logic services.

pub mod auth_service;
pub mod change_tracker;
pub mod dns_service;
pub mod entity_service;
pub mod history_service;
pub mod permission;
