//! Core types for the Tuni travel guide.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod coordinates;
pub mod email;
pub mod id;
pub mod permission;
pub mod rating;

pub use coordinates::{Coordinates, TUNIS_CITY_CENTER, format_distance, walking_time};
pub use email::{Email, EmailError};
pub use id::*;
pub use permission::{PermissionState, PermissionStateError};
pub use rating::{Rating, RatingError};
