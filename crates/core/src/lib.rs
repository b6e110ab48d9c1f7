//! Tuni Core - shared domain types for the Tuni travel guide.
//!
//! This crate provides the types used across all Tuni components:
//! - `guide` - State containers and backend/geocoding clients
//! - `cli` - Terminal front end driving the containers
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no async. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, emails, ratings, coordinates and permission state

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
