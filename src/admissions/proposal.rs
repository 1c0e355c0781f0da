use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState, Notifier,
    db::{self, Admission},
    session::{self, Identity},
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdmissionDraft {
    pub name: String,
    pub ruler_title: String,
    pub banner_text: String,
    pub banner_url: String,
    pub claim_text: String,
    pub claim_url: String,
    pub trivia: String,
}

fn check_len(field: &str, value: &str, max: usize) -> AppResult<()> {
    if value.chars().count() > max {
        return Err(AppError::invalid(format!("{field} must be at most {max} characters")));
    }
    Ok(())
}

impl AdmissionDraft {
    fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::invalid("Ŋation name cannot be empty"));
        }
        check_len("Ŋation name", self.name.trim(), 200)?;
        check_len("Ruler title", &self.ruler_title, 200)?;
        check_len("Banner text", &self.banner_text, 1000)?;
        check_len("Banner URL", &self.banner_url, 1000)?;
        check_len("Claim text", &self.claim_text, 6000)?;
        check_len("Claim URL", &self.claim_url, 6000)?;
        check_len("Trivia", &self.trivia, 6000)?;
        Ok(())
    }
}

/// Files an application for a new nation on behalf of whoever is logged in.
///
/// The applicant need not be a member yet. Existing members apply under their
/// stored profile rather than the session's.
#[tracing::instrument(skip(db, notifier, identity, draft), fields(discord_id = identity.discord_id))]
pub async fn create_admission(
    db: &SqlitePool,
    notifier: &Notifier,
    identity: &Identity,
    draft: AdmissionDraft,
) -> AppResult<Admission> {
    draft.validate()?;

    let mut tx = db::begin_write(db).await?;

    let (display_name, avatar_url) = match db::fetch_member(&mut tx, identity.discord_id).await {
        Ok(member) => {
            if !member.active {
                return Err(AppError::forbidden("Your account is inactive"));
            }
            (member.display_name, member.avatar_url)
        }
        Err(AppError::NotFound(_)) => (identity.display_name.clone(), identity.avatar_url.clone()),
        Err(e) => return Err(e),
    };

    let (rules,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM memberships WHERE member = ? AND ruler = TRUE")
            .bind(identity.discord_id)
            .fetch_one(&mut *tx)
            .await?;
    if rules > 0 {
        return Err(AppError::invalid("Rulers cannot apply for another ŋation"));
    }

    let (pending,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM admissions WHERE discord_id = ? AND closed = FALSE")
            .bind(identity.discord_id)
            .fetch_one(&mut *tx)
            .await?;
    if pending > 0 {
        return Err(AppError::invalid("You already have an open admission"));
    }

    let admission: Admission = sqlx::query_as(
        "INSERT INTO admissions (
            discord_id, display_name, avatar_url, name, ruler_title,
            banner_text, banner_url, claim_text, claim_url, trivia
         )
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(identity.discord_id)
    .bind(display_name)
    .bind(avatar_url)
    .bind(draft.name.trim())
    .bind(draft.ruler_title)
    .bind(draft.banner_text)
    .bind(draft.banner_url)
    .bind(draft.claim_text)
    .bind(draft.claim_url)
    .bind(draft.trivia)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(admission_id = admission.id, "admission created");

    let link = notifier.link(&format!("/admissions/{}", admission.id));
    notifier.notify(
        format!("**{}** applied for admission as [**{}**](<{link}>).", admission.display_name, admission.name),
        true,
    );
    Ok(admission)
}

/// Admins may always manage an admission; proposers only while it is open.
fn check_manage_access(me: &db::Member, admission: &Admission) -> AppResult<()> {
    if me.administrator {
        return Ok(());
    }
    if admission.discord_id != me.discord_id {
        return Err(AppError::forbidden("This is not your admission"));
    }
    if admission.closed {
        return Err(AppError::invalid("Admission already closed"));
    }
    Ok(())
}

/// Loads the acting party, who may be an applicant without a member row.
async fn fetch_manager(
    conn: &mut sqlx::SqliteConnection,
    actor_id: i64,
) -> AppResult<db::Member> {
    match db::fetch_member(conn, actor_id).await {
        Err(AppError::NotFound(_)) => Ok(db::Member {
            discord_id: actor_id,
            display_name: String::new(),
            avatar_url: String::new(),
            represented_nation: None,
            active: true,
            administrator: false,
            staff_only: false,
        }),
        Ok(member) if !member.active => Err(AppError::forbidden("Your account is inactive")),
        other => other,
    }
}

#[tracing::instrument(skip(db, draft))]
pub async fn edit_admission(
    db: &SqlitePool,
    actor_id: i64,
    admission_id: i64,
    draft: AdmissionDraft,
) -> AppResult<Admission> {
    draft.validate()?;

    let mut tx = db::begin_write(db).await?;
    let me = fetch_manager(&mut tx, actor_id).await?;
    let admission = db::fetch_admission(&mut tx, admission_id).await?;
    check_manage_access(&me, &admission)?;

    let admission = sqlx::query_as(
        "UPDATE admissions
         SET name = ?, ruler_title = ?, banner_text = ?, banner_url = ?,
             claim_text = ?, claim_url = ?, trivia = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(draft.name.trim())
    .bind(draft.ruler_title)
    .bind(draft.banner_text)
    .bind(draft.banner_url)
    .bind(draft.claim_text)
    .bind(draft.claim_url)
    .bind(draft.trivia)
    .bind(admission_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(admission)
}

#[tracing::instrument(skip(db))]
pub async fn delete_admission(db: &SqlitePool, actor_id: i64, admission_id: i64) -> AppResult<()> {
    let mut tx = db::begin_write(db).await?;
    let me = fetch_manager(&mut tx, actor_id).await?;
    let admission = db::fetch_admission(&mut tx, admission_id).await?;
    check_manage_access(&me, &admission)?;

    sqlx::query("DELETE FROM admissions WHERE id = ?")
        .bind(admission_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(admission_id, "admission deleted");
    Ok(())
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
    Json(draft): Json<AdmissionDraft>,
) -> AppResult<Json<Admission>> {
    let identity = session::current_identity(&session).await?;
    Ok(Json(create_admission(&db_pool, &notifier, &identity, draft).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn edit(
    Path(admission_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(draft): Json<AdmissionDraft>,
) -> AppResult<Json<Admission>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(edit_admission(&db_pool, me, admission_id, draft).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete(
    Path(admission_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<()> {
    let me = session::current_member_id(&session).await?;
    delete_admission(&db_pool, me, admission_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn applicant(discord_id: i64) -> Identity {
        Identity {
            discord_id,
            display_name: "Newcomer".to_owned(),
            avatar_url: String::new(),
        }
    }

    fn draft(name: &str) -> AdmissionDraft {
        AdmissionDraft {
            name: name.to_owned(),
            claim_text: "The island nobody wanted".to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn strangers_can_apply_once() {
        let db = testutil::pool().await;
        let notifier = Notifier::disabled();

        let admission = create_admission(&db, &notifier, &applicant(7), draft("Atlantis"))
            .await
            .unwrap();
        assert_eq!(admission.display_name, "Newcomer");
        assert!(!admission.closed);

        let err = create_admission(&db, &notifier, &applicant(7), draft("Lemuria"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn rulers_cannot_apply() {
        let db = testutil::pool().await;
        let (ruler, _) = testutil::citizen(&db, 1).await;

        let err = create_admission(&db, &Notifier::disabled(), &applicant(ruler), draft("Second"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn members_apply_under_their_profile() {
        let db = testutil::pool().await;
        let member = testutil::member(&db, 3).await;

        let admission = create_admission(&db, &Notifier::disabled(), &applicant(member), draft("Mu"))
            .await
            .unwrap();
        assert_eq!(admission.display_name, "member 3");
    }

    #[tokio::test]
    async fn proposers_edit_until_closed() {
        let db = testutil::pool().await;
        let admin = testutil::admin(&db, 99).await;
        let admission = create_admission(&db, &Notifier::disabled(), &applicant(7), draft("Atlantis"))
            .await
            .unwrap();

        let edited = edit_admission(&db, 7, admission.id, draft("Atlantica")).await.unwrap();
        assert_eq!(edited.name, "Atlantica");
        assert!(matches!(
            edit_admission(&db, 8, admission.id, draft("Stolen")).await,
            Err(AppError::Forbidden(_))
        ));

        sqlx::query("UPDATE admissions SET closed = TRUE WHERE id = ?")
            .bind(admission.id)
            .execute(&*db)
            .await
            .unwrap();
        assert!(delete_admission(&db, 7, admission.id).await.is_err());
        delete_admission(&db, admin, admission.id).await.unwrap();
        assert_eq!(testutil::count(&db, "SELECT COUNT(*) FROM admissions").await, 0);
    }

    #[tokio::test]
    async fn overlong_fields_are_refused() {
        let db = testutil::pool().await;
        let mut long = draft("Verbose");
        long.trivia = "x".repeat(6001);

        let err = create_admission(&db, &Notifier::disabled(), &applicant(7), long)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
