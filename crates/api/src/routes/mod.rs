pub mod admin;
pub mod auth;
pub mod bookings;
pub mod contacts;
pub mod health;
pub mod push;
pub mod reports;
pub mod schedules;
