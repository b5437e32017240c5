//! # plowtrack
//!
//! Postgres-backed clearance tracking for winter road service.
//!
//! Tracks per-street, per-day clearance status through its round
//! lifecycle, reconciles operator-entered work durations into billable
//! time windows, and keeps connected clients aligned through a
//! LISTEN/NOTIFY change feed. Observability via OpenTelemetry.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod model;
pub mod realtime;
pub mod store;
pub mod telemetry;
