mod edit;
pub mod eligibility;
mod membership;
pub mod population;
mod representation;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    routing::{delete, get, post},
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    AppResult, AppState,
    db::{self, Nation},
};

pub use edit::{EditNation, edit_nation};
pub use membership::{add_member, remove_member};
pub use population::eligible_nation_count;
pub use representation::{NationStatus, set_nation_status, set_represented_nation};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/{id}", get(show).post(edit::edit))
        .route("/{id}/status", post(representation::set_status))
        .route("/{id}/represent", post(representation::represent))
        .route("/{id}/members", post(membership::add))
        .route("/{id}/members/{member}", delete(membership::remove))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct NationMember {
    pub discord_id: i64,
    pub display_name: String,
    pub avatar_url: String,
    pub administrator: bool,
    pub ruler: bool,
}

#[derive(Debug, Serialize)]
pub struct NationDetails {
    #[serde(flatten)]
    pub nation: Nation,
    pub members: Vec<NationMember>,
}

pub async fn list_nations(db: &SqlitePool) -> AppResult<Vec<Nation>> {
    Ok(
        sqlx::query_as("SELECT * FROM nations ORDER BY name COLLATE NOCASE")
            .fetch_all(db)
            .await?,
    )
}

/// A nation with its members, rulers first.
pub async fn nation_details(db: &SqlitePool, nation_id: i64) -> AppResult<NationDetails> {
    let mut conn = db.acquire().await?;
    let nation = db::fetch_nation(&mut conn, nation_id).await?;
    let members = sqlx::query_as(
        "SELECT members.discord_id, members.display_name, members.avatar_url,
                members.administrator, memberships.ruler
         FROM memberships
         JOIN members ON members.discord_id = memberships.member
         WHERE memberships.nation = ?
         ORDER BY memberships.ruler DESC, members.display_name COLLATE NOCASE",
    )
    .bind(nation_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(NationDetails { nation, members })
}

#[debug_handler]
async fn list(State(db_pool): State<SqlitePool>) -> AppResult<Json<Vec<Nation>>> {
    Ok(Json(list_nations(&db_pool).await?))
}

#[debug_handler]
async fn show(
    Path(nation_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<NationDetails>> {
    Ok(Json(nation_details(&db_pool, nation_id).await?))
}
