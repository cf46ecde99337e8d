//! Database repositories
//!
//! Thin sqlx wrappers per entity. Anything that must be atomic with an
//! outbox or audit write takes a transaction.

pub mod audit;
pub mod bookings;
pub mod broadcasts;
pub mod contacts;
pub mod otp;
pub mod outbox;
pub mod push;
pub mod reports;
pub mod schedules;
pub mod shifts;
pub mod users;
