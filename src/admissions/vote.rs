use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState, Notifier,
    db::{self, Admission},
    nations::{eligibility, population},
    session,
};

#[derive(Debug, Deserialize)]
pub(crate) struct VoteBody {
    vote: bool,
}

/// Admission needs a strict majority of the whole live population, not of
/// the votes cast.
pub fn admission_passes(in_favour: i64, population: i64) -> bool {
    in_favour * 2 > population
}

/// Closes the admission as passed and founds its nation.
///
/// Returns the new nation, or `None` if someone else got there first.
pub(crate) async fn admit(conn: &mut SqliteConnection, admission_id: i64) -> AppResult<Option<(Admission, i64)>> {
    let admission: Option<Admission> = sqlx::query_as(
        "UPDATE admissions SET passed = TRUE, closed = TRUE
         WHERE id = ? AND closed = FALSE
         RETURNING *",
    )
    .bind(admission_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(admission) = admission else {
        tracing::debug!(admission_id, "admission already closed");
        return Ok(None);
    };

    let (nation_id,): (i64,) = sqlx::query_as(
        "INSERT INTO nations (name, banner_text, banner_url) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(&admission.name)
    .bind(&admission.banner_text)
    .bind(&admission.banner_url)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO members (discord_id, display_name, avatar_url, represented_nation)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (discord_id) DO UPDATE
         SET represented_nation = excluded.represented_nation
         WHERE represented_nation IS NULL",
    )
    .bind(admission.discord_id)
    .bind(&admission.display_name)
    .bind(&admission.avatar_url)
    .bind(nation_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO memberships (member, nation, ruler) VALUES (?, ?, TRUE)")
        .bind(admission.discord_id)
        .bind(nation_id)
        .execute(&mut *conn)
        .await?;

    tracing::info!(admission_id, nation_id, ruler = admission.discord_id, "admission passed");
    Ok(Some((admission, nation_id)))
}

fn announce(notifier: &Notifier, admission: &Admission, nation_id: i64) {
    let link = notifier.link(&format!("/nations/{nation_id}"));
    notifier.notify(
        format!("[**{}**](<{link}>) has been admitted to the assembly!", admission.name),
        false,
    );
}

/// Records a nation's vote on an admission and admits it once a majority of
/// all eligible nations is in favour.
#[tracing::instrument(skip(db, notifier))]
pub async fn cast_admission_vote(
    db: &SqlitePool,
    notifier: &Notifier,
    actor_id: i64,
    admission_id: i64,
    in_favour: bool,
) -> AppResult<Admission> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let admission = db::fetch_admission(&mut tx, admission_id).await?;

    if admission.closed {
        return Err(AppError::invalid("Admission already closed"));
    }
    if admission.discord_id == me.discord_id {
        return Err(AppError::forbidden("You cannot vote on your own admission"));
    }

    let nation = eligibility::nation_for_vote(&mut tx, &me).await?;

    sqlx::query(
        "INSERT INTO admission_votes (admission, nation, member, vote)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (admission, nation)
         DO UPDATE SET member = excluded.member, vote = excluded.vote",
    )
    .bind(admission_id)
    .bind(nation.id)
    .bind(me.discord_id)
    .bind(in_favour)
    .execute(&mut *tx)
    .await?;

    let (yes,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM admission_votes WHERE admission = ? AND vote = TRUE",
    )
    .bind(admission_id)
    .fetch_one(&mut *tx)
    .await?;
    let population = population::eligible_nation_count(&mut tx).await?;

    let admitted = if admission_passes(yes, population) {
        admit(&mut tx, admission_id).await?
    } else {
        None
    };

    let admission = db::fetch_admission(&mut tx, admission_id).await?;
    tx.commit().await?;

    if let Some((admission, nation_id)) = &admitted {
        announce(notifier, admission, *nation_id);
    }
    Ok(admission)
}

/// Administrator override: admits regardless of the votes.
#[tracing::instrument(skip(db, notifier))]
pub async fn pass_admission(
    db: &SqlitePool,
    notifier: &Notifier,
    actor_id: i64,
    admission_id: i64,
) -> AppResult<Admission> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;
    if db::fetch_admission(&mut tx, admission_id).await?.closed {
        return Err(AppError::invalid("Admission already closed"));
    }

    let admitted = admit(&mut tx, admission_id).await?;
    let admission = db::fetch_admission(&mut tx, admission_id).await?;
    tx.commit().await?;

    if let Some((admission, nation_id)) = &admitted {
        announce(notifier, admission, *nation_id);
    }
    Ok(admission)
}

#[debug_handler(state = AppState)]
pub(crate) async fn vote(
    Path(admission_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
    Json(VoteBody { vote }): Json<VoteBody>,
) -> AppResult<Json<Admission>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(cast_admission_vote(&db_pool, &notifier, me, admission_id, vote).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn pass(
    Path(admission_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
) -> AppResult<Json<Admission>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(pass_admission(&db_pool, &notifier, me, admission_id).await?))
}
