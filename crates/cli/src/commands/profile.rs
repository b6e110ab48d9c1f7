//! Profile commands.

use std::io::Write;

use tuni_guide::GuideState;
use tuni_guide::backend::{ProfileRow, ProfileUpdate};
use tuni_guide::error::PersistenceError;

use super::CommandError;

fn print_profile(out: &mut impl Write, profile: &ProfileRow) -> Result<(), CommandError> {
    writeln!(out, "{}", profile.name)?;
    if let Some(age) = profile.age {
        writeln!(out, "  age:         {age}")?;
    }
    for (label, value) in [
        ("occupation", &profile.occupation),
        ("nationality", &profile.nationality),
        ("bio", &profile.bio),
    ] {
        if let Some(value) = value {
            writeln!(out, "  {label:<12} {value}")?;
        }
    }
    writeln!(out, "  updated:     {}", profile.updated_at.format("%Y-%m-%d %H:%M"))?;
    Ok(())
}

pub async fn show(state: &GuideState, out: &mut impl Write) -> Result<(), CommandError> {
    match state.load_profile().await? {
        Some(profile) => print_profile(out, &profile),
        None => {
            writeln!(out, "Guest")?;
            writeln!(out, "  Sign in to save favorites, ratings and comments.")?;
            Ok(())
        }
    }
}

pub async fn update(
    state: &GuideState,
    out: &mut impl Write,
    update: ProfileUpdate,
) -> Result<(), CommandError> {
    if update.is_empty() {
        writeln!(out, "Nothing to update.")?;
        return Ok(());
    }
    let profile = state.profiles().update(update).await?;
    writeln!(out, "Profile updated.")?;
    print_profile(out, &profile)
}

/// Print the profile on every realtime change until interrupted.
pub async fn watch(state: &GuideState, out: &mut impl Write) -> Result<(), CommandError> {
    let Some(profile) = state.load_profile().await? else {
        return Err(PersistenceError::NotSignedIn.into());
    };
    print_profile(out, &profile)?;
    out.flush()?;

    let mut changes = state.profiles().subscribe();
    state.profiles().watch_changes().await?;
    writeln!(out, "Watching for changes (Ctrl-C to stop)...")?;
    out.flush()?;

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = changes.borrow_and_update().clone();
                match current {
                    Some(profile) => print_profile(out, &profile)?,
                    None => writeln!(out, "Profile deleted.")?,
                }
                out.flush()?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    state.profiles().stop_watching();
    Ok(())
}
