//! # Marketsync Engine Library
//!
//! Core functionality for the marketplace synchronization engine: signed
//! request execution, credential lifecycle, the durable job queue with
//! leases, chunked sync planning, bounded batch actions, and the operator
//! API.

pub mod audit;
pub mod auth;
pub mod batch;
pub mod chunker;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod marketplace;
pub mod models;
pub mod refresher;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sweeper;
pub mod telemetry;
pub use migration;
