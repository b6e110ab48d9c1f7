//! Tuni Guide - state containers and backend clients for the Tunis travel guide.
//!
//! Front ends hold a [`GuideState`] and drive its containers:
//!
//! - [`session`] - sign-in state and account operations
//! - [`location`] - device position with a five-minute cache and a Tunis fallback
//! - [`interactions`] - ratings and comments, gated on sign-in
//! - [`favorites`] - favorited destinations
//! - [`profile`] - the signed-in user's profile row, kept current by realtime changes
//!
//! Containers publish their state on `tokio::sync::watch` channels; front ends
//! subscribe and re-render on change.
//!
//! # Backends
//!
//! [`backend::SupabaseClient`] talks to the hosted backend over HTTP and a
//! realtime websocket. [`backend::MemoryBackend`] keeps everything in process
//! for tests and offline use.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod favorites;
pub mod geo;
pub mod interactions;
pub mod location;
pub mod profile;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;

pub use config::GuideConfig;
pub use error::{GuideError, Result};
pub use state::{GuideParts, GuideState};
