//! Data models for cached Garmin data
//!
//! Every row returned by the cache store is an owned value built from these
//! types; nothing holds on to database rows across calls.

pub mod models;

pub use models::*;
