use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState, db,
    nations::{eligibility, representation},
    session,
};

#[derive(Debug, Deserialize)]
pub(crate) struct AddMemberBody {
    member: i64,
    #[serde(default)]
    ruler: bool,
}

/// Restores the one-ruler invariant after a member left or stepped down.
///
/// The lowest-id remaining member is promoted, preferring anyone over
/// `stepping_down`, who only gets the crown back when nobody else is left. A
/// nation with nobody left is demoted to observer so it stops counting
/// towards live quorums.
pub(crate) async fn ensure_ruler(
    conn: &mut SqliteConnection,
    nation_id: i64,
    stepping_down: Option<i64>,
) -> AppResult<()> {
    let (rulers,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM memberships WHERE nation = ? AND ruler = TRUE")
            .bind(nation_id)
            .fetch_one(&mut *conn)
            .await?;
    if rulers > 0 {
        return Ok(());
    }

    let heir: Option<(i64,)> = sqlx::query_as(
        "SELECT member FROM memberships
         WHERE nation = ?
         ORDER BY member IS ?, member
         LIMIT 1",
    )
    .bind(nation_id)
    .bind(stepping_down)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((member_id,)) = heir {
        sqlx::query("UPDATE memberships SET ruler = TRUE WHERE nation = ? AND member = ?")
            .bind(nation_id)
            .bind(member_id)
            .execute(&mut *conn)
            .await?;
        tracing::info!(nation_id, member_id, "promoted member to ruler");
        return Ok(());
    }

    let res = sqlx::query("UPDATE nations SET observer = TRUE WHERE id = ? AND observer = FALSE")
        .bind(nation_id)
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() > 0 {
        tracing::info!(nation_id, "ŋation has no members left, demoted to observer");
        representation::release_nation(conn, nation_id).await?;
    }

    Ok(())
}

/// Adds a member to a nation, or changes whether they rule it.
#[tracing::instrument(skip(db))]
pub async fn add_member(
    db: &SqlitePool,
    actor_id: i64,
    member_id: i64,
    nation_id: i64,
    ruler: bool,
) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let nation = db::fetch_nation(&mut tx, nation_id).await?;
    let member = db::fetch_member(&mut tx, member_id).await?;
    eligibility::check_edit_access(&mut tx, &me, &nation).await?;

    if member.staff_only {
        return Err(AppError::invalid("Cannot add this user to a ŋation"));
    }

    let res = sqlx::query(
        "INSERT INTO memberships (member, nation, ruler)
         VALUES (?, ?, ?)
         ON CONFLICT (member, nation)
         DO UPDATE SET ruler = excluded.ruler WHERE ruler != excluded.ruler",
    )
    .bind(member_id)
    .bind(nation_id)
    .bind(ruler)
    .execute(&mut *tx)
    .await?;

    if res.rows_affected() == 0 {
        tracing::debug!("membership unchanged");
        return Ok(());
    }

    if nation.is_eligible() && member.represented_nation.is_none() {
        sqlx::query(
            "UPDATE members SET represented_nation = ?
             WHERE discord_id = ? AND represented_nation IS NULL",
        )
        .bind(nation_id)
        .bind(member_id)
        .execute(&mut *tx)
        .await?;
    }

    // Demoting a ruler may have been the last one.
    ensure_ruler(&mut tx, nation_id, (!ruler).then_some(member_id)).await?;

    tx.commit().await?;
    Ok(())
}

/// Removes a member from a nation. Anyone may leave; removing somebody else
/// needs edit access.
#[tracing::instrument(skip(db))]
pub async fn remove_member(
    db: &SqlitePool,
    actor_id: i64,
    member_id: i64,
    nation_id: i64,
) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let nation = db::fetch_nation(&mut tx, nation_id).await?;
    let member = db::fetch_member(&mut tx, member_id).await?;
    if me.discord_id != member.discord_id {
        eligibility::check_edit_access(&mut tx, &me, &nation).await?;
    }

    let res = sqlx::query("DELETE FROM memberships WHERE member = ? AND nation = ?")
        .bind(member_id)
        .bind(nation_id)
        .execute(&mut *tx)
        .await?;

    // Somebody else removed them first.
    if res.rows_affected() == 0 {
        tracing::debug!("membership already gone");
        return Ok(());
    }

    if member.represented_nation == Some(nation_id) {
        representation::reassign_representation(&mut tx, member_id).await?;
    }

    ensure_ruler(&mut tx, nation_id, None).await?;

    tx.commit().await?;
    Ok(())
}

#[debug_handler(state = AppState)]
pub(crate) async fn add(
    Path(nation_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(AddMemberBody { member, ruler }): Json<AddMemberBody>,
) -> AppResult<()> {
    let me = session::current_member_id(&session).await?;
    add_member(&db_pool, me, member, nation_id, ruler).await
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove(
    Path((nation_id, member_id)): Path<(i64, i64)>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<()> {
    let me = session::current_member_id(&session).await?;
    remove_member(&db_pool, me, member_id, nation_id).await
}
