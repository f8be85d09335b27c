//! Batch media transform service.
//!
//! Accepts uploaded media assets, runs validated chains of transform
//! operations (cut, resize, convert, overlay) through an external engine,
//! promotes results to durable storage, and tracks every record through a
//! shared status lifecycle with bounded retries. Completion notifications
//! go out through a message broker to per-topic consumers.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
