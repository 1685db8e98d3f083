//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiration sweep: resolves due expirations proactively, so entries
//!   expire even when nobody reads them

mod expiration;

pub use expiration::spawn_expiration_task;
