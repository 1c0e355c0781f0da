//! Who is sitting in the active meeting, and the quorum bookkeeping that
//! follows them in and out.

use axum::{Json, debug_handler, extract::State};
use sqlx::{SqliteConnection, SqlitePool};
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState, Notifier, db,
    meetings::{self, MeetingStatus},
    motions::decision::{self, Decided},
    nations::eligibility,
    session,
};

pub async fn is_participant(conn: &mut SqliteConnection, nation_id: i64) -> AppResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT nation FROM meeting_participants WHERE nation = ?")
        .bind(nation_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

/// Moves the quorum of every enabled, open motion of the meeting the nation
/// has not voted on yet, then re-evaluates them.
async fn shift_quorum(
    conn: &mut SqliteConnection,
    meeting_id: i64,
    nation_id: i64,
    delta: i64,
) -> AppResult<Vec<Decided>> {
    let motions: Vec<(i64,)> = sqlx::query_as(
        "UPDATE motions
         SET quorum = MAX(quorum + ?, 0)
         WHERE meeting = ?
           AND closed = FALSE
           AND enabled = TRUE
           AND id NOT IN (SELECT motion FROM votes WHERE nation = ?)
         RETURNING id",
    )
    .bind(delta)
    .bind(meeting_id)
    .bind(nation_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut decided = Vec::new();
    for (motion_id,) in motions {
        decided.extend(decision::evaluate(conn, motion_id).await?);
    }
    Ok(decided)
}

async fn enter(conn: &mut SqliteConnection, meeting_id: i64, nation_id: i64) -> AppResult<Vec<Decided>> {
    let res = sqlx::query("INSERT INTO meeting_participants (nation) VALUES (?) ON CONFLICT DO NOTHING")
        .bind(nation_id)
        .execute(&mut *conn)
        .await?;

    if res.rows_affected() == 0 {
        tracing::debug!(nation_id, "ŋation already in the meeting");
        return Ok(Vec::new());
    }

    tracing::info!(meeting_id, nation_id, "ŋation joined the meeting");
    shift_quorum(conn, meeting_id, nation_id, 1).await
}

async fn exit(conn: &mut SqliteConnection, meeting_id: i64, nation_id: i64) -> AppResult<Vec<Decided>> {
    let res = sqlx::query("DELETE FROM meeting_participants WHERE nation = ?")
        .bind(nation_id)
        .execute(&mut *conn)
        .await?;

    if res.rows_affected() == 0 {
        tracing::debug!(nation_id, "ŋation was not in the meeting");
        return Ok(Vec::new());
    }

    tracing::info!(meeting_id, nation_id, "ŋation left the meeting");
    shift_quorum(conn, meeting_id, nation_id, -1).await
}

/// Takes a nation out of the active meeting regardless of the participation
/// flag. Used when it stops being eligible.
pub(crate) async fn withdraw(conn: &mut SqliteConnection, nation_id: i64) -> AppResult<Vec<Decided>> {
    match meetings::active_meeting(conn).await? {
        Some(meeting_id) => exit(conn, meeting_id, nation_id).await,
        None => Ok(Vec::new()),
    }
}

/// Resolves the active meeting and the caller's nation for a join or leave.
async fn open_door(conn: &mut SqliteConnection, actor_id: i64) -> AppResult<(i64, i64)> {
    let me = db::fetch_actor(conn, actor_id).await?;
    let Some(meeting_id) = meetings::active_meeting(conn).await? else {
        return Err(AppError::invalid("No meeting is in progress"));
    };
    if !meetings::participation_enabled(conn).await? {
        return Err(AppError::invalid("Participation is closed"));
    }
    let nation = eligibility::nation_for_vote(conn, &me).await?;
    Ok((meeting_id, nation.id))
}

#[tracing::instrument(skip(db, notifier))]
pub async fn join_meeting(db: &SqlitePool, notifier: &Notifier, actor_id: i64) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let (meeting_id, nation_id) = open_door(&mut tx, actor_id).await?;
    let decided = enter(&mut tx, meeting_id, nation_id).await?;
    tx.commit().await?;

    decision::announce(notifier, &decided);
    Ok(())
}

#[tracing::instrument(skip(db, notifier))]
pub async fn leave_meeting(db: &SqlitePool, notifier: &Notifier, actor_id: i64) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let (meeting_id, nation_id) = open_door(&mut tx, actor_id).await?;
    let decided = exit(&mut tx, meeting_id, nation_id).await?;
    tx.commit().await?;

    decision::announce(notifier, &decided);
    Ok(())
}

#[debug_handler(state = AppState)]
pub(crate) async fn join(
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
) -> AppResult<Json<MeetingStatus>> {
    let me = session::current_member_id(&session).await?;
    join_meeting(&db_pool, &notifier, me).await?;
    Ok(Json(meetings::meeting_status(&db_pool).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn leave(
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
) -> AppResult<Json<MeetingStatus>> {
    let me = session::current_member_id(&session).await?;
    leave_meeting(&db_pool, &notifier, me).await?;
    Ok(Json(meetings::meeting_status(&db_pool).await?))
}
