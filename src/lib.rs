//! FleetKeeper - Backend Library
//!
//! Infrastructure inventory backend with role-gated mutation and an
//! append-only change ledger.

#[macro_use]
mod macros;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
