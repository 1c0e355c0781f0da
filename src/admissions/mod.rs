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
    db::{self, Admission},
};

pub use proposal::{AdmissionDraft, create_admission, delete_admission, edit_admission};
pub use vote::{admission_passes, cast_admission_vote, pass_admission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(proposal::create))
        .route("/{id}", get(show).post(proposal::edit).delete(proposal::delete))
        .route("/{id}/vote", post(vote::vote))
        .route("/{id}/pass", post(vote::pass))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AdmissionVote {
    pub nation: i64,
    pub nation_name: String,
    pub member: i64,
    pub vote: bool,
}

#[derive(Debug, Serialize)]
pub struct AdmissionDetails {
    #[serde(flatten)]
    pub admission: Admission,
    pub in_favour: i64,
    pub votes: Vec<AdmissionVote>,
}

pub async fn list_admissions(db: &SqlitePool) -> AppResult<Vec<Admission>> {
    Ok(sqlx::query_as("SELECT * FROM admissions ORDER BY closed, id DESC")
        .fetch_all(db)
        .await?)
}

pub async fn admission_details(db: &SqlitePool, admission_id: i64) -> AppResult<AdmissionDetails> {
    let mut conn = db.acquire().await?;
    let admission = db::fetch_admission(&mut conn, admission_id).await?;
    let votes: Vec<AdmissionVote> = sqlx::query_as(
        "SELECT admission_votes.nation, nations.name AS nation_name,
                admission_votes.member, admission_votes.vote
         FROM admission_votes
         JOIN nations ON nations.id = admission_votes.nation
         WHERE admission_votes.admission = ?
         ORDER BY nations.name COLLATE NOCASE",
    )
    .bind(admission_id)
    .fetch_all(&mut *conn)
    .await?;
    let in_favour = votes.iter().filter(|v| v.vote).count() as i64;

    Ok(AdmissionDetails {
        admission,
        in_favour,
        votes,
    })
}

#[debug_handler]
async fn list(State(db_pool): State<SqlitePool>) -> AppResult<Json<Vec<Admission>>> {
    Ok(Json(list_admissions(&db_pool).await?))
}

#[debug_handler]
async fn show(
    Path(admission_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<AdmissionDetails>> {
    Ok(Json(admission_details(&db_pool, admission_id).await?))
}
