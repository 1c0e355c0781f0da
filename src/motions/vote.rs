use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState, Notifier,
    db::{self, Motion},
    meetings::{self, participants},
    motions::decision,
    nations::eligibility,
    session,
};

#[derive(Debug, Deserialize)]
pub(crate) struct VoteBody {
    vote: bool,
}

/// Records the acting member's vote for their represented nation and applies
/// any resulting transition, all in one transaction.
///
/// A nation has a single vote per motion; voting again overwrites it.
#[tracing::instrument(skip(db, notifier))]
pub async fn cast_motion_vote(
    db: &SqlitePool,
    notifier: &Notifier,
    actor_id: i64,
    motion_id: i64,
    in_favour: bool,
) -> AppResult<Motion> {
    let mut tx = db::begin_write(db).await?;
    let me = db::fetch_actor(&mut tx, actor_id).await?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;

    if !motion.enabled {
        return Err(AppError::invalid("This motion is not open for voting"));
    }

    let nation = eligibility::nation_for_vote(&mut tx, &me).await?;

    if motion.meeting.is_some()
        && motion.meeting == meetings::active_meeting(&mut tx).await?
        && !participants::is_participant(&mut tx, nation.id).await?
    {
        return Err(AppError::forbidden("Your ŋation has not joined the meeting"));
    }

    sqlx::query(
        "INSERT INTO votes (motion, nation, member, vote)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (motion, nation)
         DO UPDATE SET member = excluded.member, vote = excluded.vote",
    )
    .bind(motion_id)
    .bind(nation.id)
    .bind(me.discord_id)
    .bind(in_favour)
    .execute(&mut *tx)
    .await?;

    let decided = decision::evaluate(&mut tx, motion_id).await?;
    let motion = db::fetch_motion(&mut tx, motion_id).await?;
    tx.commit().await?;

    decision::announce(notifier, &decided);
    Ok(motion)
}

#[debug_handler(state = AppState)]
pub(crate) async fn vote(
    Path(motion_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Notifier>,
    session: Session,
    Json(VoteBody { vote }): Json<VoteBody>,
) -> AppResult<Json<Motion>> {
    let me = session::current_member_id(&session).await?;
    Ok(Json(cast_motion_vote(&db_pool, &notifier, me, motion_id, vote).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::ClosureReason, testutil};

    async fn enabled_motion(db: &SqlitePool, quorum: i64) -> i64 {
        let author = testutil::member(db, 500).await;
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO motions (type, title, text, author, quorum, enabled)
             VALUES (1, 'Roads', 'Build roads', ?, ?, TRUE) RETURNING id",
        )
        .bind(author)
        .bind(quorum)
        .fetch_one(db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn revoting_overwrites_the_nation_vote() {
        let db = testutil::pool().await;
        let notifier = Notifier::disabled();
        let m = enabled_motion(&db, 10).await;
        let (first, nation) = testutil::citizen(&db, 1).await;
        let second = testutil::member(&db, 2).await;
        testutil::join(&db, second, nation, false).await;
        testutil::represent(&db, second, nation).await;

        cast_motion_vote(&db, &notifier, first, m, true).await.unwrap();
        cast_motion_vote(&db, &notifier, second, m, false).await.unwrap();

        let votes: Vec<db::Vote> =
            sqlx::query_as("SELECT nation, member, vote FROM votes WHERE motion = ?")
                .bind(m)
                .fetch_all(&*db)
                .await
                .unwrap();
        assert_eq!(
            votes,
            [db::Vote {
                nation,
                member: second,
                vote: false
            }]
        );
    }

    #[tokio::test]
    async fn disabled_motions_refuse_votes() {
        let db = testutil::pool().await;
        let m = enabled_motion(&db, 10).await;
        sqlx::query("UPDATE motions SET enabled = FALSE WHERE id = ?")
            .bind(m)
            .execute(&*db)
            .await
            .unwrap();
        let (member, _) = testutil::citizen(&db, 1).await;

        let err = cast_motion_vote(&db, &Notifier::disabled(), member, m, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn votes_close_the_motion() {
        let db = testutil::pool().await;
        let notifier = Notifier::disabled();
        let m = enabled_motion(&db, 4).await;

        for id in 1..=2 {
            let (member, _) = testutil::citizen(&db, id).await;
            let motion = cast_motion_vote(&db, &notifier, member, m, false).await.unwrap();
            assert_eq!(motion.closed, id == 2);
        }

        let motion = testutil::get_motion(&db, m).await;
        assert_eq!(motion.reason, Some(ClosureReason::RejectedByVote));

        // Closed and disabled now.
        let (late, _) = testutil::citizen(&db, 3).await;
        assert!(cast_motion_vote(&db, &notifier, late, m, true).await.is_err());
    }

    #[tokio::test]
    async fn unrepresented_members_cannot_vote() {
        let db = testutil::pool().await;
        let m = enabled_motion(&db, 4).await;
        let loner = testutil::member(&db, 1).await;

        let err = cast_motion_vote(&db, &Notifier::disabled(), loner, m, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(testutil::count(&db, "SELECT COUNT(*) FROM votes").await, 0);
    }

    async fn cast_concurrently(db: &SqlitePool, motion: i64, voters: Vec<i64>) -> Vec<AppResult<Motion>> {
        let notifier = Notifier::disabled();
        let mut handles = Vec::new();
        for member in voters {
            let db = db.clone();
            let notifier = notifier.clone();
            handles.push(tokio::spawn(async move {
                cast_motion_vote(&db, &notifier, member, motion, true).await
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn concurrent_votes_are_all_recorded() {
        let db = testutil::pool().await;
        let m = enabled_motion(&db, 100).await;
        let mut voters = Vec::new();
        for id in 1..=8 {
            voters.push(testutil::citizen(&db, id).await.0);
        }

        for result in cast_concurrently(&db, m, voters).await {
            assert!(result.is_ok(), "{result:?}");
        }
        assert_eq!(
            testutil::count(&db, &format!("SELECT COUNT(*) FROM votes WHERE motion = {m}")).await,
            8
        );
        assert!(!testutil::get_motion(&db, m).await.closed);
    }

    #[tokio::test]
    async fn concurrent_votes_close_the_motion_once() {
        let db = testutil::pool().await;
        let m = enabled_motion(&db, 8).await;
        let mut voters = Vec::new();
        for id in 1..=8 {
            voters.push(testutil::citizen(&db, id).await.0);
        }

        let results = cast_concurrently(&db, m, voters).await;

        // The fifth vote passes 5 * 2 > 8; later voters find it closed.
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 5);
        for result in &results {
            assert!(matches!(result, Ok(_) | Err(AppError::InvalidState(_))), "{result:?}");
        }

        let motion = testutil::get_motion(&db, m).await;
        assert!(motion.passed());
        assert!(!motion.enabled);
        assert_eq!(
            testutil::count(&db, &format!("SELECT COUNT(*) FROM votes WHERE motion = {m}")).await,
            5
        );
    }
}
