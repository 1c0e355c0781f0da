//! Who may vote for, or administer, which nation.

use sqlx::SqliteConnection;

use crate::{
    AppError, AppResult,
    db::{self, Member, Membership, Nation},
};

pub async fn membership_of(
    conn: &mut SqliteConnection,
    member_id: i64,
    nation_id: i64,
) -> AppResult<Option<Membership>> {
    Ok(
        sqlx::query_as("SELECT * FROM memberships WHERE member = ? AND nation = ?")
            .bind(member_id)
            .bind(nation_id)
            .fetch_optional(conn)
            .await?,
    )
}

/// Members may vote on behalf of any eligible nation they belong to.
pub async fn check_vote_access(
    conn: &mut SqliteConnection,
    member: &Member,
    nation: &Nation,
) -> AppResult<()> {
    if nation.deleted {
        return Err(AppError::forbidden("Ŋation has been deleted"));
    }
    if nation.observer {
        return Err(AppError::forbidden("Observer ŋations cannot vote"));
    }

    if membership_of(conn, member.discord_id, nation.id).await?.is_none() {
        return Err(AppError::forbidden(
            "You cannot vote for this ŋation as you’re not a member",
        ));
    }

    Ok(())
}

/// Rulers may edit their nation; administrators may edit any nation.
pub async fn check_edit_access(
    conn: &mut SqliteConnection,
    member: &Member,
    nation: &Nation,
) -> AppResult<()> {
    if member.administrator {
        return Ok(());
    }
    if nation.deleted {
        return Err(AppError::forbidden("Ŋation has been deleted"));
    }

    match membership_of(conn, member.discord_id, nation.id).await? {
        Some(Membership { ruler: true, .. }) => Ok(()),
        Some(_) => Err(AppError::forbidden("Only rulers can edit a ŋation")),
        None => Err(AppError::forbidden("You are not a member of this ŋation")),
    }
}

/// Resolves the nation a member currently votes for.
pub async fn nation_for_vote(conn: &mut SqliteConnection, member: &Member) -> AppResult<Nation> {
    let Some(nation_id) = member.represented_nation else {
        return Err(AppError::forbidden(
            "You need to choose a represented ŋation to vote",
        ));
    };

    let nation = db::fetch_nation(conn, nation_id).await?;
    check_vote_access(conn, member, &nation).await?;
    Ok(nation)
}
