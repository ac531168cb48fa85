//! Database query functions organized by domain.

pub mod access;
pub mod courses;
pub mod credits;
pub mod referrals;
pub mod settings;
pub mod subscriptions;
pub mod users;
