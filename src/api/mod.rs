//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `POST /add` - Insert a new key, optionally with an expiration
//! - `PUT /set` - Add or replace a key
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `PUT /expire/:key` - Attach an expiration to a key
//! - `POST /clear` - Drop every entry
//! - `GET /changes` - Recent change records
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
