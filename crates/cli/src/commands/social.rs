//! Favorites, ratings and comments.

use std::io::Write;

use tuni_core::{CommentId, DestinationId};
use tuni_guide::interactions::Gated;
use tuni_guide::{GuideError, GuideState, catalog};

use super::{CommandError, SIGN_IN_REQUIRED};

/// A catalog id, or `NotFound`.
fn place_id(id: &str) -> Result<DestinationId, CommandError> {
    catalog::find(id)
        .map(catalog::Destination::id)
        .ok_or_else(|| GuideError::NotFound(format!("place {id}")).into())
}

pub async fn favorite(state: &GuideState, out: &mut impl Write, id: &str) -> Result<(), CommandError> {
    let id = place_id(id)?;
    state.load_profile().await?;

    let now_favorite = state.favorites().toggle_favorite(&id);
    if state.session().is_authenticated() {
        state.favorites().sync_to_profile(state.profiles()).await?;
    } else {
        writeln!(out, "Not signed in: favorites are kept for this session only.")?;
    }

    if now_favorite {
        writeln!(out, "Added {id} to favorites.")?;
    } else {
        writeln!(out, "Removed {id} from favorites.")?;
    }
    Ok(())
}

pub async fn favorites(state: &GuideState, out: &mut impl Write) -> Result<(), CommandError> {
    state.load_profile().await?;

    let ids = state.favorites().favorites();
    if ids.is_empty() {
        writeln!(out, "No favorites yet.")?;
    }
    for id in ids {
        let title = catalog::find(id.as_str()).map_or("(unknown place)", |p| p.title);
        writeln!(out, "{id:<24} {title}")?;
    }
    Ok(())
}

pub async fn rate(
    state: &GuideState,
    out: &mut impl Write,
    id: &str,
    value: i64,
) -> Result<(), CommandError> {
    let id = place_id(id)?;
    match state.interactions().add_rating(&id, value).await? {
        Gated::Done(rating) => writeln!(out, "Rated {id} {rating}.")?,
        Gated::SignInRequired => writeln!(out, "{SIGN_IN_REQUIRED}")?,
    }
    Ok(())
}

pub async fn comment(
    state: &GuideState,
    out: &mut impl Write,
    id: &str,
    text: &str,
) -> Result<(), CommandError> {
    let id = place_id(id)?;
    match state.interactions().add_comment(&id, text).await? {
        Gated::Done(comment) => writeln!(out, "Posted comment {}.", comment.id)?,
        Gated::SignInRequired => writeln!(out, "{SIGN_IN_REQUIRED}")?,
    }
    Ok(())
}

pub async fn uncomment(
    state: &GuideState,
    out: &mut impl Write,
    comment_id: &str,
) -> Result<(), CommandError> {
    let comment_id: CommentId = comment_id
        .parse()
        .map_err(|_| GuideError::BadRequest(format!("not a comment id: {comment_id}")))?;

    match state.interactions().remove_comment(comment_id).await? {
        Gated::Done(()) => writeln!(out, "Comment deleted.")?,
        Gated::SignInRequired => writeln!(out, "{SIGN_IN_REQUIRED}")?,
    }
    Ok(())
}

pub async fn comments(state: &GuideState, out: &mut impl Write, id: &str) -> Result<(), CommandError> {
    let id = place_id(id)?;
    state.interactions().load_destination(&id).await?;

    if let Some(rating) = state.interactions().get_rating(&id) {
        writeln!(out, "Your rating: {rating}/5")?;
    }
    let comments = state.interactions().get_user_comments(&id);
    if comments.is_empty() {
        writeln!(out, "No comments yet.")?;
    }
    for comment in comments {
        writeln!(
            out,
            "[{}] {} ({}): {}",
            comment.id,
            comment.author_label,
            comment.created_at.format("%Y-%m-%d"),
            comment.text
        )?;
    }
    Ok(())
}
