//! HTTP request handlers.

pub mod auth;
pub mod domains;
pub mod finance;
pub mod groups;
pub mod health;
pub mod history;
pub mod servers;
pub mod settings;
pub mod users;
