use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState,
    db::{self, Motion, MotionType},
    meetings, session,
};

#[derive(Debug, Clone, Deserialize)]
pub struct MotionDraft {
    #[serde(rename = "type")]
    pub kind: MotionType,
    pub title: String,
    pub text: String,
}

impl MotionDraft {
    fn validate(&self) -> AppResult<()> {
        let title = self.title.trim().chars().count();
        let text = self.text.trim().chars().count();
        if !(1..=500).contains(&title) {
            return Err(AppError::invalid("Title must be 1 to 500 characters"));
        }
        if !(1..=10000).contains(&text) {
            return Err(AppError::invalid("Text must be 1 to 10000 characters"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleBody {
    meeting: Option<i64>,
}

/// Creates a motion, scheduling it for the active meeting if there is one.
#[tracing::instrument(skip(db, draft))]
pub async fn create_motion(db: &SqlitePool, actor_id: i64, draft: MotionDraft) -> AppResult<Motion> {
    draft.validate()?;

    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let active = meetings::active_meeting(&mut tx).await?;

    let motion: Motion = sqlx::query_as(
        "INSERT INTO motions (author, type, title, text, meeting)
         VALUES (?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(me.discord_id)
    .bind(draft.kind)
    .bind(draft.title.trim())
    .bind(draft.text.trim())
    .bind(active)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(motion_id = motion.id, meeting = ?motion.meeting, "motion created");
    Ok(motion)
}

#[tracing::instrument(skip(db, draft))]
pub async fn edit_motion(
    db: &SqlitePool,
    actor_id: i64,
    motion_id: i64,
    draft: MotionDraft,
) -> AppResult<Motion> {
    draft.validate()?;

    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;
    if !motion.editable_by(&me) {
        return Err(AppError::forbidden("You cannot edit this motion"));
    }

    let motion = sqlx::query_as(
        "UPDATE motions SET type = ?, title = ?, text = ? WHERE id = ? RETURNING *",
    )
    .bind(draft.kind)
    .bind(draft.title.trim())
    .bind(draft.text.trim())
    .bind(motion_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(motion)
}

/// Deletes a motion together with its votes.
#[tracing::instrument(skip(db))]
pub async fn delete_motion(db: &SqlitePool, actor_id: i64, motion_id: i64) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;
    if !motion.editable_by(&me) {
        return Err(AppError::forbidden("You cannot delete this motion"));
    }

    sqlx::query("DELETE FROM motions WHERE id = ?")
        .bind(motion_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(motion_id, "motion deleted");
    Ok(())
}

/// Moves an open motion to another meeting, or unschedules it.
#[tracing::instrument(skip(db))]
pub async fn schedule_motion(
    db: &SqlitePool,
    actor_id: i64,
    motion_id: i64,
    meeting_id: Option<i64>,
) -> AppResult<Motion> {
    let mut tx = db::begin_write(db).await?;
    db::fetch_actor(&mut tx, actor_id).await?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;

    if motion.closed {
        return Err(AppError::invalid("Motion already closed"));
    }
    if motion.enabled {
        return Err(AppError::invalid("Motion is being voted on"));
    }
    if let Some(meeting_id) = meeting_id {
        if db::fetch_meeting(&mut tx, meeting_id).await?.finished {
            return Err(AppError::invalid("Meeting has already finished"));
        }
    }

    let motion = sqlx::query_as("UPDATE motions SET meeting = ? WHERE id = ? RETURNING *")
        .bind(meeting_id)
        .bind(motion_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(motion)
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(draft): Json<MotionDraft>,
) -> AppResult<Json<Motion>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(create_motion(&db_pool, me, draft).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn edit(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(draft): Json<MotionDraft>,
) -> AppResult<Json<Motion>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(edit_motion(&db_pool, me, motion_id, draft).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<()> {
    let me = session::current_member_id(&session).await?;
    delete_motion(&db_pool, me, motion_id).await
}

#[debug_handler(state = AppState)]
pub(crate) async fn schedule(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(ScheduleBody { meeting }): Json<ScheduleBody>,
) -> AppResult<Json<Motion>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(schedule_motion(&db_pool, me, motion_id, meeting).await?))
}
