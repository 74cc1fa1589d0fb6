//! # Trove
//!
//! A metadata registry for versioned 3D assets shared between institutions.
//!
//! Every asset carries one of six access levels plus an optional embargo.
//! The same grant rules drive single-asset checks ([`access::evaluate`]) and
//! search filtering ([`access::AccessPredicate`]). Payload versions are
//! numbered 1, 2, 3... without gaps, and tag usage counters are adjusted in
//! the same transaction as the asset change that causes them.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trove::config::Config;
//! use trove::server::{AppState, create_router};
//!
//! let config = Config::load("trove.toml".as_ref())?;
//! let state = Arc::new(AppState::open(&config)?);
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `trove` binary.

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod storage;
pub mod store;
pub mod types;
