//! Route table and sign-in guard.
//!
//! Paths map to typed [`Route`]s. Gated routes send signed-out users to the
//! login page, preserving where they were going in `?next=`.

use core::fmt;

use tuni_core::DestinationId;

use crate::catalog::Category;

/// Login page path.
pub const LOGIN_PATH: &str = "/login";

/// A screen of the guide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Discover,
    Hotels,
    Food,
    Shopping,
    Transport,
    Map,
    /// Detail page of one catalog entry.
    Detail(Category, DestinationId),
    Profile,
    EditProfile,
    Login,
    Signup,
    ResetPassword,
}

fn detail_category(segment: &str) -> Option<Category> {
    Category::ALL
        .into_iter()
        .find(|category| category.as_str() == segment)
}

impl Route {
    /// Parse a path, ignoring any query string, fragment or trailing slash.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');

        let route = match trimmed {
            "" => Self::Home,
            "/discover" => Self::Discover,
            "/hotels" => Self::Hotels,
            "/food" => Self::Food,
            "/shopping" => Self::Shopping,
            "/transport" => Self::Transport,
            "/map" => Self::Map,
            "/profile" => Self::Profile,
            "/profile/edit" => Self::EditProfile,
            "/login" => Self::Login,
            "/signup" => Self::Signup,
            "/reset-password" => Self::ResetPassword,
            other => {
                let mut segments = other.strip_prefix('/')?.split('/');
                let category = detail_category(segments.next()?)?;
                let id = segments.next().filter(|id| !id.is_empty())?;
                if segments.next().is_some() {
                    return None;
                }
                Self::Detail(category, DestinationId::new(id))
            }
        };
        Some(route)
    }

    /// Canonical path of the route.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Home => "/".to_string(),
            Self::Discover => "/discover".to_string(),
            Self::Hotels => "/hotels".to_string(),
            Self::Food => "/food".to_string(),
            Self::Shopping => "/shopping".to_string(),
            Self::Transport => "/transport".to_string(),
            Self::Map => "/map".to_string(),
            Self::Detail(category, id) => format!("/{category}/{id}"),
            Self::Profile => "/profile".to_string(),
            Self::EditProfile => "/profile/edit".to_string(),
            Self::Login => LOGIN_PATH.to_string(),
            Self::Signup => "/signup".to_string(),
            Self::ResetPassword => "/reset-password".to_string(),
        }
    }

    /// Whether signed-out users are sent to the login page.
    ///
    /// `/profile` is not gated: it shows a guest profile.
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        matches!(self, Self::EditProfile)
    }

    /// The listing page a category belongs to.
    #[must_use]
    pub const fn listing(category: Category) -> Self {
        match category {
            Category::Destination => Self::Discover,
            Category::Hotel => Self::Hotels,
            Category::Food => Self::Food,
            Category::Shopping => Self::Shopping,
            Category::Transport => Self::Transport,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Outcome of navigating to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Show(Route),
    Redirect(String),
    NotFound,
}

/// Resolve `path` for a user who is or is not signed in.
#[must_use]
pub fn navigate(path: &str, authenticated: bool) -> Navigation {
    match Route::parse(path) {
        None => Navigation::NotFound,
        Some(route) if route.requires_auth() && !authenticated => {
            Navigation::Redirect(login_redirect(path))
        }
        Some(route) => Navigation::Show(route),
    }
}

/// `/login?next=<path>`
#[must_use]
pub fn login_redirect(next: &str) -> String {
    format!("{LOGIN_PATH}?next={}", urlencoding::encode(next))
}

/// Where to go after signing in, given the login page's query string.
///
/// Only same-site paths are honored; anything else lands on the home page.
#[must_use]
pub fn post_login_target(query: &str) -> String {
    query
        .trim_start_matches('?')
        .split('&')
        .find_map(|pair| pair.strip_prefix("next="))
        .and_then(|raw| urlencoding::decode(raw).ok())
        .map(std::borrow::Cow::into_owned)
        .filter(|target| is_local_path(target))
        .unwrap_or_else(|| "/".to_string())
}

fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}
