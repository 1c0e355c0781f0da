//! Session keys written by the upstream login flow, and the identity oracle
//! built on top of them.

use tower_sessions::Session;

use crate::{AppError, AppResult};

pub const MEMBER_ID: &str = "member_id";
pub const DISPLAY_NAME: &str = "display_name";
pub const AVATAR_URL: &str = "avatar_url";

/// Who the external identity provider says this is.
#[derive(Debug, Clone)]
pub struct Identity {
    pub discord_id: i64,
    pub display_name: String,
    pub avatar_url: String,
}

pub async fn current_member_id(session: &Session) -> AppResult<i64> {
    session
        .get::<i64>(MEMBER_ID)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or(AppError::Unauthenticated)
}

pub async fn current_identity(session: &Session) -> AppResult<Identity> {
    let discord_id = current_member_id(session).await?;
    let display_name = session
        .get::<String>(DISPLAY_NAME)
        .await
        .map_err(anyhow::Error::from)?
        .unwrap_or_else(|| format!("user{discord_id}"));
    let avatar_url = session
        .get::<String>(AVATAR_URL)
        .await
        .map_err(anyhow::Error::from)?
        .unwrap_or_default();

    Ok(Identity {
        discord_id,
        display_name,
        avatar_url,
    })
}
