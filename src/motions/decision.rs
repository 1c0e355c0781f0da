//! Pass/reject/support transitions for motions.
//!
//! Every check here runs on the caller's transaction and every write is
//! guarded by a conditional update, so re-running an evaluation (or racing
//! another one) never closes or supports a motion twice.

use sqlx::SqliteConnection;

use crate::{
    AppResult, Notifier,
    db::{self, ClosureReason},
    nations::population,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub in_favour: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Rejected,
}

impl Tally {
    pub fn against(self) -> i64 {
        self.total - self.in_favour
    }

    /// Decides against the quorum fixed on the motion; `None` while open.
    ///
    /// Passing needs a strict majority, rejecting only half, so a tie is a
    /// rejection. Nothing is decided before the first vote.
    pub fn outcome(self, quorum: i64) -> Option<Outcome> {
        if self.total == 0 {
            None
        } else if self.in_favour * 2 > quorum {
            Some(Outcome::Passed)
        } else if self.against() * 2 >= quorum {
            Some(Outcome::Rejected)
        } else {
            None
        }
    }

    /// Constitutional support: more than 3/5 of the live eligible population.
    pub fn has_support(self, population: i64) -> bool {
        self.in_favour * 5 > population * 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Passed,
    Rejected,
    Supported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decided {
    pub motion_id: i64,
    pub title: String,
    pub transition: Transition,
}

pub async fn tally(conn: &mut SqliteConnection, motion_id: i64) -> AppResult<Tally> {
    let (in_favour, total): (i64, i64) =
        sqlx::query_as("SELECT COALESCE(SUM(vote), 0), COUNT(*) FROM votes WHERE motion = ?")
            .bind(motion_id)
            .fetch_one(conn)
            .await?;
    Ok(Tally { in_favour, total })
}

/// Re-reads a motion and applies whatever transitions its votes now warrant.
pub async fn evaluate(conn: &mut SqliteConnection, motion_id: i64) -> AppResult<Vec<Decided>> {
    let motion = db::fetch_motion(conn, motion_id).await?;
    let constitutional = motion.is_constitutional();
    let mut decided = Vec::new();

    if motion.closed && (!constitutional || motion.supported) {
        return Ok(decided);
    }

    let tally = tally(conn, motion_id).await?;
    let mut passed = motion.passed();

    if !motion.closed {
        let Some(outcome) = tally.outcome(motion.quorum) else {
            return Ok(decided);
        };

        let (reason, transition) = match outcome {
            Outcome::Passed => (ClosureReason::Passed, Transition::Passed),
            Outcome::Rejected => (ClosureReason::RejectedByVote, Transition::Rejected),
        };

        // Constitutional motions stay open for support votes once passed.
        let keep_enabled = constitutional && outcome == Outcome::Passed;
        let res = sqlx::query(
            "UPDATE motions SET closed = TRUE, reason = ?, enabled = ?
             WHERE id = ? AND closed = FALSE",
        )
        .bind(reason)
        .bind(keep_enabled)
        .bind(motion_id)
        .execute(&mut *conn)
        .await?;

        if res.rows_affected() == 0 {
            tracing::debug!(motion_id, "motion already closed");
            return Ok(decided);
        }

        tracing::info!(
            motion_id,
            ?reason,
            in_favour = tally.in_favour,
            total = tally.total,
            quorum = motion.quorum,
            "motion closed by vote"
        );
        decided.push(Decided {
            motion_id,
            title: motion.title.clone(),
            transition,
        });
        passed = outcome == Outcome::Passed;
    }

    if passed && constitutional && !motion.supported {
        let population = population::eligible_nation_count(conn).await?;
        if tally.has_support(population) {
            let res = sqlx::query(
                "UPDATE motions SET supported = TRUE, enabled = FALSE
                 WHERE id = ? AND supported = FALSE AND closed = TRUE AND reason = ?",
            )
            .bind(motion_id)
            .bind(ClosureReason::Passed)
            .execute(&mut *conn)
            .await?;

            if res.rows_affected() > 0 {
                tracing::info!(motion_id, in_favour = tally.in_favour, population, "motion has constitutional support");
                decided.push(Decided {
                    motion_id,
                    title: motion.title,
                    transition: Transition::Supported,
                });
            }
        }
    }

    Ok(decided)
}

/// Announces committed transitions.
pub fn announce(notifier: &Notifier, decided: &[Decided]) {
    for d in decided {
        let link = notifier.link(&format!("/motions/{}", d.motion_id));
        let verb = match d.transition {
            Transition::Passed => "has passed",
            Transition::Rejected => "has been rejected",
            Transition::Supported => "has reached constitutional support",
        };
        notifier.notify(format!("Motion [**{}**](<{link}>) {verb}!", d.title), false);
    }
}
