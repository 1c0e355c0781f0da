//! Keeps `members.represented_nation` pointing at an eligible nation the
//! member belongs to, or at nothing.

use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tower_sessions::Session;

use crate::{
    AppResult, AppState,
    db::{self, Nation},
    meetings::participants,
    nations::eligibility,
    session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NationStatus {
    Observer,
    Deleted,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetStatusBody {
    status: NationStatus,
    value: bool,
}

/// Points a member at the lowest-id eligible nation they belong to, or at
/// nothing if there is none.
pub(crate) async fn reassign_representation(
    conn: &mut SqliteConnection,
    member_id: i64,
) -> AppResult<Option<i64>> {
    let nation: Option<(i64,)> = sqlx::query_as(
        "SELECT memberships.nation
         FROM memberships
         JOIN nations ON nations.id = memberships.nation
         WHERE memberships.member = ?
           AND nations.deleted = FALSE
           AND nations.observer = FALSE
         ORDER BY memberships.nation
         LIMIT 1",
    )
    .bind(member_id)
    .fetch_optional(&mut *conn)
    .await?;
    let nation = nation.map(|(id,)| id);

    sqlx::query("UPDATE members SET represented_nation = ? WHERE discord_id = ?")
        .bind(nation)
        .bind(member_id)
        .execute(&mut *conn)
        .await?;

    tracing::info!(member_id, ?nation, "reassigned represented ŋation");
    Ok(nation)
}

/// Called once a nation stopped being eligible: nobody may represent it and
/// it may not sit in the active meeting.
pub(crate) async fn release_nation(conn: &mut SqliteConnection, nation_id: i64) -> AppResult<()> {
    let members: Vec<(i64,)> = sqlx::query_as(
        "UPDATE members
         SET represented_nation = NULL
         WHERE represented_nation = ?
         RETURNING discord_id",
    )
    .bind(nation_id)
    .fetch_all(&mut *conn)
    .await?;

    for (member_id,) in members {
        reassign_representation(conn, member_id).await?;
    }

    participants::withdraw(conn, nation_id).await?;
    Ok(())
}

/// Called once a nation became eligible again: members without a represented
/// nation pick it up.
pub(crate) async fn adopt_nation(conn: &mut SqliteConnection, nation_id: i64) -> AppResult<()> {
    let res = sqlx::query(
        "UPDATE members
         SET represented_nation = ?
         WHERE represented_nation IS NULL
           AND discord_id IN (SELECT member FROM memberships WHERE nation = ?)",
    )
    .bind(nation_id)
    .bind(nation_id)
    .execute(conn)
    .await?;

    if res.rows_affected() > 0 {
        tracing::info!(nation_id, members = res.rows_affected(), "ŋation adopted as representation");
    }
    Ok(())
}

/// Toggles a nation's observer or deleted flag and repairs representation.
///
/// Rulers may toggle observer status; only administrators may (un)delete.
#[tracing::instrument(skip(db))]
pub async fn set_nation_status(
    db: &SqlitePool,
    actor_id: i64,
    nation_id: i64,
    status: NationStatus,
    value: bool,
) -> AppResult<Nation> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let nation = db::fetch_nation(&mut tx, nation_id).await?;

    match status {
        NationStatus::Observer => eligibility::check_edit_access(&mut tx, &me, &nation).await?,
        NationStatus::Deleted => db::require_admin(&me)?,
    }

    let sql = match status {
        NationStatus::Observer => "UPDATE nations SET observer = ? WHERE id = ?",
        NationStatus::Deleted => "UPDATE nations SET deleted = ? WHERE id = ?",
    };
    sqlx::query(sql)
        .bind(value)
        .bind(nation_id)
        .execute(&mut *tx)
        .await?;

    let nation = db::fetch_nation(&mut tx, nation_id).await?;
    if nation.is_eligible() {
        adopt_nation(&mut tx, nation_id).await?;
    } else {
        release_nation(&mut tx, nation_id).await?;
    }

    tx.commit().await?;
    tracing::info!(nation_id, observer = nation.observer, deleted = nation.deleted, "ŋation status changed");
    Ok(nation)
}

/// Chooses which of their nations the acting member votes for.
#[tracing::instrument(skip(db))]
pub async fn set_represented_nation(db: &SqlitePool, actor_id: i64, nation_id: i64) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let nation = db::fetch_nation(&mut tx, nation_id).await?;
    eligibility::check_vote_access(&mut tx, &me, &nation).await?;

    sqlx::query("UPDATE members SET represented_nation = ? WHERE discord_id = ?")
        .bind(nation_id)
        .bind(actor_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[debug_handler(state = AppState)]
pub(crate) async fn set_status(
    Path(nation_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(SetStatusBody { status, value }): Json<SetStatusBody>,
) -> AppResult<Json<Nation>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(set_nation_status(&db_pool, me, nation_id, status, value).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn represent(
    Path(nation_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<()> {
    let me = session::current_member_id(&session).await?;
    set_represented_nation(&db_pool, me, nation_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppError, testutil};

    #[tokio::test]
    async fn deleting_a_nation_moves_representatives_elsewhere() {
        let db = testutil::pool().await;
        let admin = testutil::admin(&db, 99).await;
        let (member, first) = testutil::citizen(&db, 1).await;
        let second = testutil::nation(&db, "Second").await;
        let observer = testutil::nation(&db, "Observer").await;
        testutil::join(&db, member, observer, true).await;
        testutil::join(&db, member, second, true).await;
        sqlx::query("UPDATE nations SET observer = TRUE WHERE id = ?")
            .bind(observer)
            .execute(&*db)
            .await
            .unwrap();

        set_nation_status(&db, admin, first, NationStatus::Deleted, true)
            .await
            .unwrap();

        let m = testutil::get_member(&db, member).await;
        let represented = m.represented_nation.expect("member should be reassigned");
        assert_ne!(represented, first);
        assert!(testutil::get_nation(&db, represented).await.is_eligible());
    }

    #[tokio::test]
    async fn representation_is_cleared_when_no_eligible_nation_remains() {
        let db = testutil::pool().await;
        let (member, nation) = testutil::citizen(&db, 1).await;

        set_nation_status(&db, member, nation, NationStatus::Observer, true)
            .await
            .unwrap();
        assert_eq!(testutil::get_member(&db, member).await.represented_nation, None);

        // Restoring it hands the nation back to members without representation.
        set_nation_status(&db, member, nation, NationStatus::Observer, false)
            .await
            .unwrap();
        assert_eq!(
            testutil::get_member(&db, member).await.represented_nation,
            Some(nation)
        );
    }

    #[tokio::test]
    async fn only_admins_can_delete() {
        let db = testutil::pool().await;
        let (ruler, nation) = testutil::citizen(&db, 1).await;

        let err = set_nation_status(&db, ruler, nation, NationStatus::Deleted, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(!testutil::get_nation(&db, nation).await.deleted);
    }

    #[tokio::test]
    async fn cannot_represent_an_observer_nation() {
        let db = testutil::pool().await;
        let (member, home) = testutil::citizen(&db, 1).await;
        let other = testutil::nation(&db, "Other").await;
        testutil::join(&db, member, other, false).await;
        sqlx::query("UPDATE nations SET observer = TRUE WHERE id = ?")
            .bind(other)
            .execute(&*db)
            .await
            .unwrap();

        assert!(set_represented_nation(&db, member, other).await.is_err());
        assert_eq!(
            testutil::get_member(&db, member).await.represented_nation,
            Some(home)
        );
    }
}
