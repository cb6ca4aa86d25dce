//! Common types shared across Chorus signaling components.

#![warn(clippy::pedantic)]

/// Module for typed entity identifiers
pub mod types;
