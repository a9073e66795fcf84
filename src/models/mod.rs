//! Database models (SQLx).

pub mod domain;
pub mod finance;
pub mod group;
pub mod history;
pub mod server;
pub mod settings;
pub mod user;
