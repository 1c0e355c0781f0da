use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState,
    db::{self, Nation},
    nations::eligibility,
    session,
};

#[derive(Debug, Deserialize)]
pub struct EditNation {
    pub name: String,
    #[serde(default)]
    pub banner_text: String,
    #[serde(default)]
    pub banner_url: String,
    #[serde(default)]
    pub wiki_page_link: String,
}

impl EditNation {
    fn validate(&self) -> AppResult<()> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > 200 {
            return Err(AppError::invalid("Ŋation name must be 1 to 200 characters"));
        }
        if self.banner_text.len() > 1000 || self.banner_url.len() > 6000 || self.wiki_page_link.len() > 6000 {
            return Err(AppError::invalid("Ŋation details are too long"));
        }
        Ok(())
    }
}

#[tracing::instrument(skip(db, edit))]
pub async fn edit_nation(
    db: &SqlitePool,
    actor_id: i64,
    nation_id: i64,
    edit: EditNation,
) -> AppResult<Nation> {
    edit.validate()?;

    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let nation = db::fetch_nation(&mut tx, nation_id).await?;
    eligibility::check_edit_access(&mut tx, &me, &nation).await?;

    let nation = sqlx::query_as(
        "UPDATE nations
         SET name = ?, banner_text = ?, banner_url = ?, wiki_page_link = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(edit.name.trim())
    .bind(edit.banner_text.trim())
    .bind(edit.banner_url.trim())
    .bind(edit.wiki_page_link.trim())
    .bind(nation_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(nation)
}

#[debug_handler(state = AppState)]
pub(crate) async fn edit(
    Path(nation_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(body): Json<EditNation>,
) -> AppResult<Json<Nation>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(edit_nation(&db_pool, me, nation_id, body).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn renamed(name: &str) -> EditNation {
        EditNation {
            name: name.to_owned(),
            banner_text: String::new(),
            banner_url: String::new(),
            wiki_page_link: "https://wiki.example/Ŋ".to_owned(),
        }
    }

    #[tokio::test]
    async fn rulers_can_rename_their_nation() {
        let db = testutil::pool().await;
        let (ruler, nation) = testutil::citizen(&db, 1).await;

        let n = edit_nation(&db, ruler, nation, renamed("  New Name ")).await.unwrap();
        assert_eq!(n.name, "New Name");
        assert_eq!(n.wiki_page_link, "https://wiki.example/Ŋ");
    }

    #[tokio::test]
    async fn deleted_nations_cannot_be_edited_by_rulers() {
        let db = testutil::pool().await;
        let (ruler, nation) = testutil::citizen(&db, 1).await;
        sqlx::query("UPDATE nations SET deleted = TRUE WHERE id = ?")
            .bind(nation)
            .execute(&*db)
            .await
            .unwrap();

        let err = edit_nation(&db, ruler, nation, renamed("Ghost")).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn blank_names_are_refused() {
        let db = testutil::pool().await;
        let (ruler, nation) = testutil::citizen(&db, 1).await;

        let err = edit_nation(&db, ruler, nation, renamed("   ")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
