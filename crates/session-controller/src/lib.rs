//! Session Controller (SC) Service Library
//!
//! This library provides the signaling core of the Chorus collaboration
//! platform - an in-memory HTTP/WebSocket service responsible for:
//!
//! - Guest session registry (invitation tokens, ephemeral identities)
//! - Admission control (request/admit/decline with broadcast fan-out)
//! - Key-bundle storage and exchange (identity, signed, one-time pre-keys)
//! - Sender-key distribution with offline queueing
//! - Media room and peer management (transports, producers, consumers)
//!
//! # Architecture
//!
//! HTTP endpoints go through handlers backed by shared stores; signaling
//! sessions dispatch to a supervised actor hierarchy:
//!
//! ```text
//! routes.rs -> handlers/*.rs -> stores/*.rs
//! signaling.rs -> actors/manager.rs -> actors/room.rs -> relay
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `models` - Data models
//! - `protocol` - Signaling wire messages
//! - `actors` - Room supervision actor hierarchy
//! - `relay` - Media relay abstraction
//! - `routes` - Axum router setup

pub mod actors;
pub mod admission;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod protocol;
pub mod relay;
pub mod routes;
pub mod signaling;
pub mod stores;
