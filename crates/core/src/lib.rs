//! Nightwatch Core - Domain logic and models
//!
//! This crate contains pure domain logic with no I/O operations.
//! All database models, the shift occurrence engine, security primitives
//! and error types are defined here.

pub mod config;
pub mod cron;
pub mod error;
pub mod models;
pub mod security;
pub mod shifts;
pub mod timezone;
pub mod types;
pub mod validation;

pub use cron::{CronCache, normalize_cron, parse_cron, validate_cron_expr};
pub use error::{DomainError, DomainResult};
pub use shifts::{ShiftOccurrence, occurrences_in_window, validate_occurrence};
pub use timezone::{parse_timezone, to_utc, validate_timezone};
