mod finish;
pub mod participants;

use axum::{
    Json, Router, debug_handler,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState,
    db::{self, Meeting},
    session,
};

pub use finish::finish_meeting;
pub use participants::{join_meeting, leave_meeting};

/// Rows of the `global_vars` singleton table.
#[derive(Debug, Clone, Copy)]
#[repr(i64)]
enum GlobalVar {
    ActiveMeeting = 1,
    ParticipationEnabled = 2,
}

const NO_ACTIVE_MEETING: i64 = 0;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/status", get(status))
        .route("/active", post(activate))
        .route("/participation", post(participation))
        .route("/join", post(participants::join))
        .route("/leave", post(participants::leave))
        .route("/{id}/finish", post(finish::finish))
}

async fn get_var(conn: &mut SqliteConnection, var: GlobalVar) -> AppResult<i64> {
    let value: Option<(i64,)> = sqlx::query_as("SELECT value FROM global_vars WHERE id = ?")
        .bind(var as i64)
        .fetch_optional(conn)
        .await?;
    Ok(value.map_or(0, |(v,)| v))
}

async fn set_var(conn: &mut SqliteConnection, var: GlobalVar, value: i64) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO global_vars (id, value) VALUES (?, ?)
         ON CONFLICT (id) DO UPDATE SET value = excluded.value",
    )
    .bind(var as i64)
    .bind(value)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn active_meeting(conn: &mut SqliteConnection) -> AppResult<Option<i64>> {
    let id = get_var(conn, GlobalVar::ActiveMeeting).await?;
    Ok((id != NO_ACTIVE_MEETING).then_some(id))
}

pub async fn participation_enabled(conn: &mut SqliteConnection) -> AppResult<bool> {
    Ok(get_var(conn, GlobalVar::ParticipationEnabled).await? != 0)
}

/// Forgets everybody in the meeting room and closes the door.
async fn clear_participants(conn: &mut SqliteConnection) -> AppResult<()> {
    set_var(conn, GlobalVar::ParticipationEnabled, 0).await?;
    sqlx::query("DELETE FROM meeting_participants")
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct MeetingStatus {
    pub active_meeting: Option<Meeting>,
    pub participation_enabled: bool,
    pub participants: Vec<i64>,
}

pub async fn meeting_status(db: &SqlitePool) -> AppResult<MeetingStatus> {
    let mut conn = db.acquire().await?;
    let active_meeting = match active_meeting(&mut conn).await? {
        Some(id) => Some(db::fetch_meeting(&mut conn, id).await?),
        None => None,
    };
    let participation_enabled = participation_enabled(&mut conn).await?;
    let participants = sqlx::query_scalar("SELECT nation FROM meeting_participants ORDER BY nation")
        .fetch_all(&mut *conn)
        .await?;

    Ok(MeetingStatus {
        active_meeting,
        participation_enabled,
        participants,
    })
}

pub async fn list_meetings(db: &SqlitePool) -> AppResult<Vec<Meeting>> {
    Ok(sqlx::query_as("SELECT * FROM meetings ORDER BY id DESC")
        .fetch_all(db)
        .await?)
}

#[tracing::instrument(skip(db))]
pub async fn create_meeting(db: &SqlitePool, actor_id: i64, name: &str) -> AppResult<Meeting> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 50 {
        return Err(AppError::invalid("Meeting name must be 1 to 50 characters"));
    }

    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;

    let meeting: Meeting = sqlx::query_as("INSERT INTO meetings (name) VALUES (?) RETURNING *")
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(meeting_id = meeting.id, "meeting created");
    Ok(meeting)
}

/// Points the assembly at a meeting (or at none).
///
/// Switching to a different meeting empties the room; participation has to be
/// reopened for the new one.
#[tracing::instrument(skip(db))]
pub async fn set_active_meeting(db: &SqlitePool, actor_id: i64, meeting_id: Option<i64>) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;

    if let Some(meeting_id) = meeting_id {
        if db::fetch_meeting(&mut tx, meeting_id).await?.finished {
            return Err(AppError::invalid("Meeting has already finished"));
        }
    }

    if active_meeting(&mut tx).await? == meeting_id {
        return Ok(());
    }

    clear_participants(&mut tx).await?;
    set_var(&mut tx, GlobalVar::ActiveMeeting, meeting_id.unwrap_or(NO_ACTIVE_MEETING)).await?;

    tx.commit().await?;
    tracing::info!(?meeting_id, "active meeting changed");
    Ok(())
}

/// Opens or closes the meeting room for joining and leaving.
#[tracing::instrument(skip(db))]
pub async fn set_participation(db: &SqlitePool, actor_id: i64, enabled: bool) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    db::require_admin(&me)?;

    if enabled && active_meeting(&mut tx).await?.is_none() {
        return Err(AppError::invalid("No meeting is in progress"));
    }

    set_var(&mut tx, GlobalVar::ParticipationEnabled, enabled as i64).await?;
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ActivateBody {
    meeting: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ParticipationBody {
    enabled: bool,
}

#[debug_handler]
async fn list(State(db_pool): State<SqlitePool>) -> AppResult<Json<Vec<Meeting>>> {
    Ok(Json(list_meetings(&db_pool).await?))
}

#[debug_handler]
async fn status(State(db_pool): State<SqlitePool>) -> AppResult<Json<MeetingStatus>> {
    Ok(Json(meeting_status(&db_pool).await?))
}

#[debug_handler(state = AppState)]
async fn create(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(CreateBody { name }): Json<CreateBody>,
) -> AppResult<Json<Meeting>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(create_meeting(&db_pool, me, &name).await?))
}

#[debug_handler(state = AppState)]
async fn activate(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(ActivateBody { meeting }): Json<ActivateBody>,
) -> AppResult<()> {
    let me = session::current_member_id(&session).await?;
    set_active_meeting(&db_pool, me, meeting).await
}

#[debug_handler(state = AppState)]
async fn participation(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(ParticipationBody { enabled }): Json<ParticipationBody>,
) -> AppResult<()> {
    let me = session::current_member_id(&session).await?;
    set_participation(&db_pool, me, enabled).await
}
