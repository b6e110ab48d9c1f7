//! Location, search and page commands.

use std::io::Write;

use tuni_core::Coordinates;
use tuni_guide::GuideState;
use tuni_guide::catalog::{self, Category, Destination};
use tuni_guide::location::{LocationEvent, LocationState};
use tuni_guide::routes::{Navigation, Route, navigate};

use super::CommandError;
use crate::LocationAction;

fn print_location(out: &mut impl Write, location: &LocationState) -> Result<(), CommandError> {
    match location.coordinates {
        Some(at) => writeln!(
            out,
            "{} ({:.4}, {:.4})",
            location.location_name, at.lat, at.lng
        )?,
        None => writeln!(out, "{}", location.location_name)?,
    }
    if let Some(notice) = &location.error {
        writeln!(out, "  {notice}")?;
    }
    writeln!(out, "  permission: {}", location.permission)?;
    Ok(())
}

fn print_place(out: &mut impl Write, place: &Destination) -> Result<(), CommandError> {
    writeln!(
        out,
        "{:<24} {:<11} {:.1}★  {}",
        place.slug, place.category, place.rating, place.title
    )?;
    Ok(())
}

/// Current position, refreshing it first.
///
/// An undecided permission prints the question instead of a position.
async fn current_position(
    state: &GuideState,
    out: &mut impl Write,
) -> Result<Option<Coordinates>, CommandError> {
    let mut events = state.location().events();
    let location = state.location().update_location().await;

    if let Ok(LocationEvent::PermissionPrompt { .. }) = events.try_recv() {
        writeln!(
            out,
            "Allow location access? Run `tuni location allow`, or `tuni location skip` to use Tunis."
        )?;
    }
    Ok(location.coordinates)
}

pub async fn location(
    state: &GuideState,
    out: &mut impl Write,
    action: LocationAction,
) -> Result<(), CommandError> {
    match action {
        LocationAction::Refresh => {
            current_position(state, out).await?;
        }
        LocationAction::Allow => {
            if let Err(e) = state.location().request_permission().await {
                writeln!(out, "{e}")?;
            }
        }
        LocationAction::Skip => {
            state.location().skip_permission();
        }
    }
    print_location(out, &state.location().snapshot())
}

pub async fn nearby(
    state: &GuideState,
    out: &mut impl Write,
    limit: usize,
) -> Result<(), CommandError> {
    let Some(from) = current_position(state, out).await? else {
        return Ok(());
    };

    for place in catalog::nearby(from, limit) {
        writeln!(
            out,
            "{:<28} {:>12}  {:>8} walk",
            place.destination.title, place.distance_label, place.walking_time
        )?;
    }
    Ok(())
}

pub fn search(
    out: &mut impl Write,
    query: &str,
    category: Option<&str>,
) -> Result<(), CommandError> {
    let category = category
        .map(str::parse::<Category>)
        .transpose()
        .map_err(|e| tuni_guide::GuideError::BadRequest(e.to_string()))?;

    let hits: Vec<_> = catalog::search(query)
        .into_iter()
        .filter(|place| category.is_none_or(|c| place.category == c))
        .collect();
    if hits.is_empty() {
        writeln!(out, "No places match \"{query}\".")?;
    }
    for place in hits {
        print_place(out, place)?;
    }
    Ok(())
}

pub async fn open(state: &GuideState, out: &mut impl Write, path: &str) -> Result<(), CommandError> {
    let route = match navigate(path, state.session().is_authenticated()) {
        Navigation::Show(route) => route,
        Navigation::Redirect(to) => {
            writeln!(out, "Sign in required; continue at {to}")?;
            return Ok(());
        }
        Navigation::NotFound => {
            return Err(tuni_guide::GuideError::NotFound(path.to_string()).into());
        }
    };

    match &route {
        Route::Home | Route::Discover => list(out, Category::Destination)?,
        Route::Hotels => list(out, Category::Hotel)?,
        Route::Food => list(out, Category::Food)?,
        Route::Shopping => list(out, Category::Shopping)?,
        Route::Transport => list(out, Category::Transport)?,
        Route::Map => {
            current_position(state, out).await?;
            print_location(out, &state.location().snapshot())?;
        }
        Route::Detail(_, id) => {
            let place = catalog::find(id.as_str())
                .ok_or_else(|| tuni_guide::GuideError::NotFound(id.to_string()))?;
            writeln!(out, "{} ({:.1}★)", place.title, place.rating)?;
            writeln!(out, "{}", place.location)?;
            writeln!(out, "{}", place.description)?;
            writeln!(out, "Favorite: {}", state.favorites().is_favorite(id))?;
            writeln!(out, "Back: {}", Route::listing(place.category))?;
        }
        Route::Profile | Route::EditProfile => super::profile::show(state, out).await?,
        Route::Login | Route::Signup | Route::ResetPassword => {
            writeln!(out, "Use `tuni {}` instead.", route.path().trim_start_matches('/'))?;
        }
    }
    Ok(())
}

fn list(out: &mut impl Write, category: Category) -> Result<(), CommandError> {
    for place in catalog::by_category(category) {
        print_place(out, place)?;
    }
    Ok(())
}
