mod admin;
pub mod decision;
mod proposal;
mod vote;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    AppResult, AppState,
    db::{self, Motion},
};

pub use admin::{close_motion, disable_motion, enable_motion, lock_motion, reevaluate_motion, reset_motion};
pub use decision::{Tally, Transition};
pub use proposal::{MotionDraft, create_motion, delete_motion, edit_motion, schedule_motion};
pub use vote::cast_motion_vote;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(proposal::create))
        .route("/{id}", get(show).post(proposal::edit).delete(proposal::delete))
        .route("/{id}/schedule", post(proposal::schedule))
        .route("/{id}/vote", post(vote::vote))
        .route("/{id}/enable", post(admin::enable))
        .route("/{id}/close", post(admin::close))
        .route("/{id}/reset", post(admin::reset))
        .route("/{id}/lock", post(admin::lock))
        .route("/{id}/reevaluate", post(admin::reevaluate))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CastVote {
    pub nation: i64,
    pub nation_name: String,
    pub member: i64,
    pub vote: bool,
}

#[derive(Debug, Serialize)]
pub struct MotionDetails {
    #[serde(flatten)]
    pub motion: Motion,
    pub in_favour: i64,
    pub total: i64,
    pub votes: Vec<CastVote>,
}

pub async fn list_motions(db: &SqlitePool) -> AppResult<Vec<Motion>> {
    Ok(sqlx::query_as("SELECT * FROM motions ORDER BY id DESC")
        .fetch_all(db)
        .await?)
}

pub async fn motion_details(db: &SqlitePool, motion_id: i64) -> AppResult<MotionDetails> {
    let mut conn = db.acquire().await?;
    let motion = db::fetch_motion(&mut conn, motion_id).await?;
    let Tally { in_favour, total } = decision::tally(&mut conn, motion_id).await?;
    let votes = sqlx::query_as(
        "SELECT votes.nation, nations.name AS nation_name, votes.member, votes.vote
         FROM votes
         JOIN nations ON nations.id = votes.nation
         WHERE votes.motion = ?
         ORDER BY nations.name COLLATE NOCASE",
    )
    .bind(motion_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(MotionDetails {
        motion,
        in_favour,
        total,
        votes,
    })
}

#[debug_handler]
async fn list(State(db_pool): State<SqlitePool>) -> AppResult<Json<Vec<Motion>>> {
    Ok(Json(list_motions(&db_pool).await?))
}

#[debug_handler]
async fn show(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<MotionDetails>> {
    Ok(Json(motion_details(&db_pool, motion_id).await?))
}
