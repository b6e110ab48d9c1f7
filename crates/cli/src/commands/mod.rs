//! Command implementations.
//!
//! Each command drives the guide's state containers and writes its result
//! to `out`.

pub mod account;
pub mod explore;
pub mod profile;
pub mod social;

use thiserror::Error;
use tuni_guide::GuideError;

/// Errors from running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The guide rejected or failed the operation.
    #[error(transparent)]
    Guide(#[from] GuideError),

    /// Writing to the terminal failed.
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),
}

macro_rules! via_guide_error {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for CommandError {
                fn from(e: $source) -> Self {
                    Self::Guide(GuideError::from(e))
                }
            }
        )+
    };
}

via_guide_error!(
    tuni_guide::session::AuthError,
    tuni_guide::interactions::InteractionError,
    tuni_guide::error::PersistenceError,
    tuni_guide::geo::LocationError,
    tuni_guide::backend::BackendError,
);

/// Printed when a mutation needs a session.
pub const SIGN_IN_REQUIRED: &str = "Please sign in to continue: tuni login -e <email> -p <password>";
