//! Account commands: sign up, sign in, sign out and passwords.

use std::io::Write;

use tuni_guide::GuideState;

use super::CommandError;

pub async fn signup(
    state: &GuideState,
    out: &mut impl Write,
    email: &str,
    password: &str,
    username: &str,
) -> Result<(), CommandError> {
    state.session().signup(email, password, username).await?;

    if state.session().is_authenticated() {
        writeln!(out, "Welcome, {username}! You are signed in.")?;
    } else {
        writeln!(out, "Check {email} to confirm your account, then run `tuni login`.")?;
    }
    Ok(())
}

pub async fn login(
    state: &GuideState,
    out: &mut impl Write,
    email: &str,
    password: &str,
) -> Result<(), CommandError> {
    state.session().login(email, password).await?;
    let profile = state.load_profile().await?;

    let name = profile.map_or_else(|| email.to_string(), |p| p.name);
    writeln!(out, "Signed in as {name}.")?;
    Ok(())
}

pub async fn logout(state: &GuideState, out: &mut impl Write) -> Result<(), CommandError> {
    state.session().logout().await;
    writeln!(out, "Signed out.")?;
    Ok(())
}

pub async fn reset_password(
    state: &GuideState,
    out: &mut impl Write,
    email: &str,
) -> Result<(), CommandError> {
    state.session().reset_password(email).await?;
    writeln!(out, "If {email} has an account, a reset link is on its way.")?;
    Ok(())
}

pub async fn update_password(
    state: &GuideState,
    out: &mut impl Write,
    password: &str,
) -> Result<(), CommandError> {
    state.session().update_password(password).await?;
    writeln!(out, "Password updated.")?;
    Ok(())
}

pub fn whoami(state: &GuideState, out: &mut impl Write) -> Result<(), CommandError> {
    match state.session().user() {
        Some(user) => {
            let email = user.email.as_ref().map_or("-", |e| e.as_str());
            let name = user.display_name().unwrap_or_default();
            writeln!(out, "{name} <{email}> ({})", user.id)?;
        }
        None => writeln!(out, "Not signed in.")?,
    }
    Ok(())
}
