use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState, Notifier,
    db::{self, ClosureReason, Motion},
    meetings,
    motions::decision,
    session,
};

#[derive(Debug, Deserialize)]
pub(crate) struct EnableBody {
    enable: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CloseBody {
    reason: ClosureReason,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LockBody {
    lock: bool,
}

/// Opens a motion for voting, fixing its quorum at the number of nations
/// currently in the meeting.
#[tracing::instrument(skip(db))]
pub async fn enable_motion(db: &SqlitePool, actor_id: i64, motion_id: i64) -> AppResult<Motion> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;

    if motion.closed {
        return Err(AppError::invalid("Motion already closed"));
    }

    let active = meetings::active_meeting(&mut tx).await?;
    let Some(meeting_id) = motion.meeting.filter(|&m| Some(m) == active) else {
        return Err(AppError::invalid("Motion is not scheduled for the active meeting"));
    };
    if db::fetch_meeting(&mut tx, meeting_id).await?.finished {
        return Err(AppError::invalid("Meeting has already finished"));
    }

    let res = sqlx::query(
        "UPDATE motions
         SET enabled = TRUE, quorum = (SELECT COUNT(*) FROM meeting_participants)
         WHERE id = ? AND closed = FALSE AND enabled = FALSE",
    )
    .bind(motion_id)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        tracing::debug!("motion already enabled");
    }

    let motion = db::fetch_motion(&mut tx, motion_id).await?;
    tx.commit().await?;
    tracing::info!(motion_id, quorum = motion.quorum, "motion enabled");
    Ok(motion)
}

#[tracing::instrument(skip(db))]
pub async fn disable_motion(db: &SqlitePool, actor_id: i64, motion_id: i64) -> AppResult<Motion> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;
    db::fetch_motion(&mut tx, motion_id).await?;

    let motion = sqlx::query_as("UPDATE motions SET enabled = FALSE WHERE id = ? RETURNING *")
        .bind(motion_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(motion)
}

/// Force-closes a motion. Returns whether anything changed; closing again
/// with the same reason is a no-op.
#[tracing::instrument(skip(db, notifier))]
pub async fn close_motion(
    db: &SqlitePool,
    notifier: &Notifier,
    actor_id: i64,
    motion_id: i64,
    reason: ClosureReason,
) -> AppResult<bool> {
    if reason == ClosureReason::Passed {
        return Err(AppError::invalid("Motions can only pass by vote"));
    }

    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;

    let res = sqlx::query(
        "UPDATE motions
         SET closed = TRUE, enabled = FALSE, supported = FALSE, reason = ?
         WHERE id = ? AND NOT (closed = TRUE AND reason IS ?)",
    )
    .bind(reason)
    .bind(motion_id)
    .bind(reason)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let changed = res.rows_affected() > 0;
    if changed {
        tracing::info!(motion_id, ?reason, "motion closed by administrator");
        let link = notifier.link(&format!("/motions/{motion_id}"));
        notifier.notify(format!("Motion [**{}**](<{link}>) has been closed.", motion.title), false);
    } else {
        tracing::debug!(motion_id, "motion already closed for this reason");
    }
    Ok(changed)
}

/// Throws away all votes and returns the motion to its state before it was
/// enabled.
#[tracing::instrument(skip(db))]
pub async fn reset_motion(db: &SqlitePool, actor_id: i64, motion_id: i64) -> AppResult<Motion> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;
    db::fetch_motion(&mut tx, motion_id).await?;

    sqlx::query("DELETE FROM votes WHERE motion = ?")
        .bind(motion_id)
        .execute(&mut *tx)
        .await?;
    let motion = sqlx::query_as(
        "UPDATE motions
         SET enabled = FALSE, quorum = 0, supported = FALSE, closed = FALSE, reason = NULL
         WHERE id = ?
         RETURNING *",
    )
    .bind(motion_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(motion_id, "motion reset");
    Ok(motion)
}

/// Authors may lock their own open motion; only administrators may unlock.
#[tracing::instrument(skip(db))]
pub async fn lock_motion(db: &SqlitePool, actor_id: i64, motion_id: i64, lock: bool) -> AppResult<Motion> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;

    if !me.administrator {
        if !lock || motion.author != me.discord_id {
            return Err(AppError::forbidden("Only administrators can do this"));
        }
        if motion.locked || motion.closed {
            return Err(AppError::invalid("Motion is already locked or closed"));
        }
    }

    let motion = sqlx::query_as("UPDATE motions SET locked = ? WHERE id = ? RETURNING *")
        .bind(lock)
        .bind(motion_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(motion)
}

/// Re-runs the transition check, e.g. after the nation population changed.
#[tracing::instrument(skip(db, notifier))]
pub async fn reevaluate_motion(
    db: &SqlitePool,
    notifier: &Notifier,
    actor_id: i64,
    motion_id: i64,
) -> AppResult<Motion> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;

    let decided = decision::evaluate(&mut tx, motion_id).await?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;
    tx.commit().await?;

    decision::announce(notifier, &decided);
    Ok(motion)
}

#[debug_handler(state = AppState)]
pub(crate) async fn enable(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(EnableBody { enable }): Json<EnableBody>,
) -> AppResult<Json<Motion>> {
    let me = session::current_member_id(&session).await?;
    let motion = if enable {
        enable_motion(&db_pool, me, motion_id).await?
    } else {
        disable_motion(&db_pool, me, motion_id).await?
    };
    Ok(Json(motion))
}

#[debug_handler(state = AppState)]
pub(crate) async fn close(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
    Json(CloseBody { reason }): Json<CloseBody>,
) -> AppResult<Json<bool>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(close_motion(&db_pool, &notifier, me, motion_id, reason).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn reset(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Motion>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(reset_motion(&db_pool, me, motion_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn lock(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(LockBody { lock }): Json<LockBody>,
) -> AppResult<Json<Motion>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(lock_motion(&db_pool, me, motion_id, lock).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn reevaluate(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
) -> AppResult<Json<Motion>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(reevaluate_motion(&db_pool, &notifier, me, motion_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    async fn scheduled_motion(db: &SqlitePool, author: i64, meeting: i64) -> i64 {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO motions (type, title, text, author, meeting)
             VALUES (1, 'Roads', 'Build roads', ?, ?) RETURNING id",
        )
        .bind(author)
        .bind(meeting)
        .fetch_one(db)
        .await
        .unwrap();
        id
    }

    async fn activate(db: &SqlitePool, meeting: i64, participants: &[i64]) {
        sqlx::query("UPDATE global_vars SET value = ? WHERE id = 1")
            .bind(meeting)
            .execute(db)
            .await
            .unwrap();
        for nation in participants {
            sqlx::query("INSERT INTO meeting_participants (nation) VALUES (?)")
                .bind(nation)
                .execute(db)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn enabling_snapshots_the_participant_count() {
        let db = testutil::pool().await;
        let admin = testutil::admin(&db, 99).await;
        let meeting = testutil::meeting(&db, "Session 1").await;
        let m = scheduled_motion(&db, admin, meeting).await;
        let mut nations = Vec::new();
        for id in 1..=3 {
            nations.push(testutil::citizen(&db, id).await.1);
        }
        activate(&db, meeting, &nations[..2]).await;

        let motion = enable_motion(&db, admin, m).await.unwrap();
        assert!(motion.enabled);
        assert_eq!(motion.quorum, 2);
    }

    #[tokio::test]
    async fn only_motions_of_the_active_meeting_can_be_enabled() {
        let db = testutil::pool().await;
        let admin = testutil::admin(&db, 99).await;
        let active = testutil::meeting(&db, "Now").await;
        let later = testutil::meeting(&db, "Later").await;
        let m = scheduled_motion(&db, admin, later).await;
        activate(&db, active, &[]).await;

        let err = enable_motion(&db, admin, m).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let (citizen, _) = testutil::citizen(&db, 1).await;
        let m = scheduled_motion(&db, admin, active).await;
        let err = enable_motion(&db, citizen, m).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn closed_motions_cannot_be_reenabled() {
        let db = testutil::pool().await;
        let admin = testutil::admin(&db, 99).await;
        let meeting = testutil::meeting(&db, "Now").await;
        let m = scheduled_motion(&db, admin, meeting).await;
        activate(&db, meeting, &[]).await;

        assert!(close_motion(&db, &Notifier::disabled(), admin, m, ClosureReason::Withdrawn).await.unwrap());
        let err = enable_motion(&db, admin, m).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn closing_twice_with_the_same_reason_is_a_no_op() {
        let db = testutil::pool().await;
        let notifier = Notifier::disabled();
        let admin = testutil::admin(&db, 99).await;
        let meeting = testutil::meeting(&db, "Now").await;
        let m = scheduled_motion(&db, admin, meeting).await;

        assert!(close_motion(&db, &notifier, admin, m, ClosureReason::RejectedByChair).await.unwrap());
        assert!(!close_motion(&db, &notifier, admin, m, ClosureReason::RejectedByChair).await.unwrap());
        assert!(close_motion(&db, &notifier, admin, m, ClosureReason::Superseded).await.unwrap());

        let err = close_motion(&db, &notifier, admin, m, ClosureReason::Passed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(testutil::get_motion(&db, m).await.reason, Some(ClosureReason::Superseded));
    }

    #[tokio::test]
    async fn reset_returns_to_draft() {
        let db = testutil::pool().await;
        let admin = testutil::admin(&db, 99).await;
        let meeting = testutil::meeting(&db, "Now").await;
        let m = scheduled_motion(&db, admin, meeting).await;
        let (member, nation) = testutil::citizen(&db, 1).await;
        sqlx::query("UPDATE motions SET enabled = TRUE, quorum = 1, closed = TRUE, reason = 1 WHERE id = ?")
            .bind(m)
            .execute(&*db)
            .await
            .unwrap();
        sqlx::query("INSERT INTO votes (motion, nation, member, vote) VALUES (?, ?, ?, TRUE)")
            .bind(m)
            .bind(nation)
            .bind(member)
            .execute(&*db)
            .await
            .unwrap();

        let motion = reset_motion(&db, admin, m).await.unwrap();
        assert!(!motion.enabled && !motion.closed && !motion.supported);
        assert_eq!((motion.quorum, motion.reason), (0, None));
        assert_eq!(testutil::count(&db, "SELECT COUNT(*) FROM votes").await, 0);
    }

    #[tokio::test]
    async fn authors_lock_but_cannot_unlock() {
        let db = testutil::pool().await;
        let admin = testutil::admin(&db, 99).await;
        let author = testutil::member(&db, 1).await;
        let meeting = testutil::meeting(&db, "Now").await;
        let m = scheduled_motion(&db, author, meeting).await;

        assert!(lock_motion(&db, author, m, true).await.unwrap().locked);
        assert!(lock_motion(&db, author, m, false).await.is_err());
        assert!(!lock_motion(&db, admin, m, false).await.unwrap().locked);
    }
}
