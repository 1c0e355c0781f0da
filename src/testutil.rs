//! Fixtures for tests: a throwaway database plus shortcuts for seeding rows
//! directly, bypassing the access checks under test.

use std::ops::Deref;

use sqlx::{SqlitePool, sqlite::SqliteConnectOptions};
use tempfile::TempDir;

use crate::db::{self, Admission, Meeting, Member, Motion, Nation};

pub struct TestDb {
    pool: SqlitePool,
    _dir: TempDir,
}

impl Deref for TestDb {
    type Target = SqlitePool;

    fn deref(&self) -> &SqlitePool {
        &self.pool
    }
}

pub async fn pool() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new().filename(dir.path().join("assembly.db"));
    let pool = db::open(options, 4).await.unwrap();
    TestDb { pool, _dir: dir }
}

pub async fn nation(db: &SqlitePool, name: &str) -> i64 {
    let (id,): (i64,) = sqlx::query_as("INSERT INTO nations (name) VALUES (?) RETURNING id")
        .bind(name)
        .fetch_one(db)
        .await
        .unwrap();
    id
}

pub async fn member(db: &SqlitePool, id: i64) -> i64 {
    sqlx::query("INSERT INTO members (discord_id, display_name) VALUES (?, ?)")
        .bind(id)
        .bind(format!("member {id}"))
        .execute(db)
        .await
        .unwrap();
    id
}

pub async fn admin(db: &SqlitePool, id: i64) -> i64 {
    member(db, id).await;
    sqlx::query("UPDATE members SET administrator = TRUE WHERE discord_id = ?")
        .bind(id)
        .execute(db)
        .await
        .unwrap();
    id
}

pub async fn join(db: &SqlitePool, member: i64, nation: i64, ruler: bool) {
    sqlx::query("INSERT INTO memberships (member, nation, ruler) VALUES (?, ?, ?)")
        .bind(member)
        .bind(nation)
        .bind(ruler)
        .execute(db)
        .await
        .unwrap();
}

pub async fn represent(db: &SqlitePool, member: i64, nation: i64) {
    sqlx::query("UPDATE members SET represented_nation = ? WHERE discord_id = ?")
        .bind(nation)
        .bind(member)
        .execute(db)
        .await
        .unwrap();
}

/// A nation whose sole member rules and represents it.
pub async fn citizen(db: &SqlitePool, id: i64) -> (i64, i64) {
    let nation = nation(db, &format!("Ŋation {id}")).await;
    member(db, id).await;
    join(db, id, nation, true).await;
    represent(db, id, nation).await;
    (id, nation)
}

pub async fn meeting(db: &SqlitePool, name: &str) -> i64 {
    let (id,): (i64,) = sqlx::query_as("INSERT INTO meetings (name) VALUES (?) RETURNING id")
        .bind(name)
        .fetch_one(db)
        .await
        .unwrap();
    id
}

pub async fn get_motion(db: &SqlitePool, id: i64) -> Motion {
    db::fetch_motion(&mut *db.acquire().await.unwrap(), id)
        .await
        .unwrap()
}

pub async fn get_member(db: &SqlitePool, id: i64) -> Member {
    db::fetch_member(&mut *db.acquire().await.unwrap(), id)
        .await
        .unwrap()
}

pub async fn get_nation(db: &SqlitePool, id: i64) -> Nation {
    db::fetch_nation(&mut *db.acquire().await.unwrap(), id)
        .await
        .unwrap()
}

pub async fn get_admission(db: &SqlitePool, id: i64) -> Admission {
    db::fetch_admission(&mut *db.acquire().await.unwrap(), id)
        .await
        .unwrap()
}

pub async fn get_meeting(db: &SqlitePool, id: i64) -> Meeting {
    db::fetch_meeting(&mut *db.acquire().await.unwrap(), id)
        .await
        .unwrap()
}

pub async fn count(db: &SqlitePool, sql: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(sql).fetch_one(db).await.unwrap();
    n
}
