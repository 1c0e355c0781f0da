use axum::{
    debug_handler,
    extract::{Path, State},
};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState, Notifier, db,
    meetings::{self, GlobalVar, NO_ACTIVE_MEETING},
    motions::decision,
    nations::population,
    session,
};

/// Concludes the active meeting.
///
/// Every motion still open in it is rebased onto the whole eligible
/// population, locked and left enabled so absent nations can still vote.
#[tracing::instrument(skip(db, notifier))]
pub async fn finish_meeting(
    db: &SqlitePool,
    notifier: &Notifier,
    actor_id: i64,
    meeting_id: i64,
) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;
    let meeting = db::fetch_meeting(&mut tx, meeting_id).await?;

    if meeting.finished {
        return Err(AppError::invalid("Meeting has already finished"));
    }
    if meetings::active_meeting(&mut tx).await? != Some(meeting_id) {
        return Err(AppError::invalid("Only the active meeting can be finished"));
    }

    let population = population::eligible_nation_count(&mut tx).await?;
    let motions: Vec<(i64,)> = sqlx::query_as(
        "UPDATE motions
         SET quorum = ?, locked = TRUE, enabled = TRUE
         WHERE meeting = ? AND closed = FALSE
         RETURNING id",
    )
    .bind(population)
    .bind(meeting_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut decided = Vec::new();
    for &(motion_id,) in &motions {
        decided.extend(decision::evaluate(&mut tx, motion_id).await?);
    }

    meetings::clear_participants(&mut tx).await?;
    meetings::set_var(&mut tx, GlobalVar::ActiveMeeting, NO_ACTIVE_MEETING).await?;

    let res = sqlx::query("UPDATE meetings SET finished = TRUE WHERE id = ? AND finished = FALSE")
        .bind(meeting_id)
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() == 0 {
        tracing::debug!("meeting already finished");
        return Ok(());
    }

    tx.commit().await?;
    tracing::info!(meeting_id, open_motions = motions.len(), population, "meeting finished");

    notifier.notify(
        format!(
            "Meeting **{}** has finished. Motions still open can now be voted on by every ŋation.",
            meeting.name
        ),
        false,
    );
    decision::announce(notifier, &decided);
    Ok(())
}

#[debug_handler(state = AppState)]
pub(crate) async fn finish(
    Path(meeting_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
) -> AppResult<()> {
    let me = session::current_member_id(&session).await?;
    finish_meeting(&db_pool, &notifier, me, meeting_id).await
}
