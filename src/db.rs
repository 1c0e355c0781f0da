//! Row types for the assembly tables and the lookups every operation shares.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::{
    FromRow, Sqlite, SqliteConnection, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Nation {
    pub id: i64,
    pub name: String,
    pub banner_text: String,
    pub banner_url: String,
    pub wiki_page_link: String,
    /// Observer nations cannot vote and do not count towards any quorum.
    pub observer: bool,
    pub deleted: bool,
}

impl Nation {
    pub fn is_eligible(&self) -> bool {
        !self.observer && !self.deleted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Member {
    pub discord_id: i64,
    pub display_name: String,
    pub avatar_url: String,
    pub represented_nation: Option<i64>,
    pub active: bool,
    pub administrator: bool,
    pub staff_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Membership {
    pub member: i64,
    pub nation: i64,
    pub ruler: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum MotionType {
    Unsure = 0,
    Legislative = 1,
    Executive = 2,
    Constitutional = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ClosureReason {
    Passed = 1,
    RejectedByVote = 2,
    RejectedByChair = 3,
    Withdrawn = 4,
    Superseded = 5,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Motion {
    pub id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: MotionType,
    pub title: String,
    pub text: String,
    pub author: i64,
    pub meeting: Option<i64>,
    /// Voter population fixed when the motion was enabled.
    pub quorum: i64,
    pub locked: bool,
    pub closed: bool,
    pub enabled: bool,
    pub supported: bool,
    pub reason: Option<ClosureReason>,
}

impl Motion {
    pub fn passed(&self) -> bool {
        self.closed && self.reason == Some(ClosureReason::Passed)
    }

    pub fn is_constitutional(&self) -> bool {
        self.kind == MotionType::Constitutional
    }

    /// Admins may always edit; authors only until the motion is locked.
    pub fn editable_by(&self, member: &Member) -> bool {
        member.administrator || (!self.locked && self.author == member.discord_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Vote {
    pub nation: i64,
    pub member: i64,
    pub vote: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Admission {
    pub id: i64,
    pub discord_id: i64,
    pub display_name: String,
    pub avatar_url: String,
    pub name: String,
    pub ruler_title: String,
    pub banner_text: String,
    pub banner_url: String,
    pub claim_text: String,
    pub claim_url: String,
    pub trivia: String,
    pub passed: bool,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Meeting {
    pub id: i64,
    pub name: String,
    pub finished: bool,
}

/// Opens the pool and brings the schema up to date.
pub async fn open(options: SqliteConnectOptions, max_connections: u32) -> AppResult<SqlitePool> {
    let options = options
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&db_pool).await?;
    Ok(db_pool)
}

/// Starts a transaction that holds the write lock from its first statement.
///
/// A deferred transaction that reads first fails outright when it later
/// tries to write after another writer; taking the lock up front makes
/// concurrent writers wait on `busy_timeout` instead.
pub async fn begin_write(db: &SqlitePool) -> AppResult<Transaction<'static, Sqlite>> {
    Ok(db.begin_with("BEGIN IMMEDIATE").await?)
}

pub async fn fetch_member(conn: &mut SqliteConnection, id: i64) -> AppResult<Member> {
    sqlx::query_as("SELECT * FROM members WHERE discord_id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound("member"))
}

pub async fn fetch_nation(conn: &mut SqliteConnection, id: i64) -> AppResult<Nation> {
    sqlx::query_as("SELECT * FROM nations WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound("nation"))
}

pub async fn fetch_motion(conn: &mut SqliteConnection, id: i64) -> AppResult<Motion> {
    sqlx::query_as("SELECT * FROM motions WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound("motion"))
}

pub async fn fetch_admission(conn: &mut SqliteConnection, id: i64) -> AppResult<Admission> {
    sqlx::query_as("SELECT * FROM admissions WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound("admission"))
}

pub async fn fetch_meeting(conn: &mut SqliteConnection, id: i64) -> AppResult<Meeting> {
    sqlx::query_as("SELECT * FROM meetings WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound("meeting"))
}

/// Loads the member behind the current session for use as the acting party.
///
/// A session pointing at a member that no longer exists counts as not logged
/// in; inactive members may not act at all.
pub async fn fetch_actor(conn: &mut SqliteConnection, id: i64) -> AppResult<Member> {
    let member = match fetch_member(conn, id).await {
        Err(AppError::NotFound(_)) => return Err(AppError::Unauthenticated),
        other => other?,
    };

    if !member.active {
        return Err(AppError::forbidden("Your account is inactive"));
    }

    Ok(member)
}

pub fn require_admin(member: &Member) -> AppResult<()> {
    if !member.administrator {
        return Err(AppError::forbidden("Only administrators can do this"));
    }
    Ok(())
}
