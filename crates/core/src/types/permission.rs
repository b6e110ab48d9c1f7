//! Geolocation permission state.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error parsing a [`PermissionState`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown permission state: {0}")]
pub struct PermissionStateError(pub String);

/// Mirrors the platform geolocation permission.
///
/// Starts as `Prompt`; the platform moves it to `Granted` or `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// The user has not decided yet.
    #[default]
    Prompt,
    /// Positions may be read without asking.
    Granted,
    /// The user refused access.
    Denied,
}

impl PermissionState {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionState {
    type Err = PermissionStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(Self::Prompt),
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(PermissionStateError(other.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_prompt() {
        assert_eq!(PermissionState::default(), PermissionState::Prompt);
    }

    #[test]
    fn test_parse_and_display() {
        for state in [
            PermissionState::Prompt,
            PermissionState::Granted,
            PermissionState::Denied,
        ] {
            assert_eq!(state.to_string().parse::<PermissionState>().unwrap(), state);
        }
        assert_eq!(" GRANTED ".parse::<PermissionState>().unwrap(), PermissionState::Granted);
        assert!("maybe".parse::<PermissionState>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&PermissionState::Denied).unwrap(),
            "\"denied\""
        );
    }
}
