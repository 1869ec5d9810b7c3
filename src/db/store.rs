//! The storage collaborator seam.
//!
//! Every operation the service layer needs is expressed here as a
//! row-oriented primitive. Idempotent inserts are explicit upserts: a key
//! conflict is an expected outcome inside the implementation, never an error
//! that reaches a caller. The two point mutations (`mark_progress` credit,
//! `redeem_achievement` debit) are single atomic read-modify-writes per
//! backend.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::db::prelude::*;

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found in '{table}'")]
    NotFound { table: &'static str },

    #[error("duplicate key on '{table}'")]
    Duplicate { table: &'static str },
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- users & sessions --

    /// `Duplicate` on a taken username.
    async fn create_user(&self, user: NewUser) -> StoreResult<i64>;
    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>>;
    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn update_display_name(&self, user_id: i64, display_name: &str) -> StoreResult<()>;
    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()>;
    /// Unconditional points=0, level=1. `NotFound` if the user is absent.
    async fn reset_points(&self, user_id: i64) -> StoreResult<()>;

    async fn insert_session(&self, token: &str, user_id: i64) -> StoreResult<()>;
    async fn session_user(&self, token: &str) -> StoreResult<Option<User>>;
    /// Idempotent; deleting an absent session is a silent success.
    async fn delete_session(&self, token: &str) -> StoreResult<()>;

    // -- challenge registry --

    async fn insert_challenge(&self, challenge: NewChallenge) -> StoreResult<i64>;
    async fn challenge_by_id(&self, id: i64) -> StoreResult<Option<Challenge>>;
    async fn update_challenge(&self, id: i64, update: ChallengeUpdate) -> StoreResult<()>;
    /// Cascades participations, progress entries and comments.
    async fn delete_challenge(&self, id: i64) -> StoreResult<()>;
    /// `is_public OR creator = viewer`, newest created first.
    async fn list_visible_challenges(&self, viewer_id: i64) -> StoreResult<Vec<Challenge>>;
    async fn list_owned_challenges(&self, creator_id: i64) -> StoreResult<Vec<Challenge>>;
    async fn list_all_challenges(&self) -> StoreResult<Vec<Challenge>>;
    async fn count_public_challenges(&self) -> StoreResult<i64>;

    // -- participation ledger --

    /// Idempotent join: re-joining is a silent success.
    async fn join_challenge(&self, user_id: i64, challenge_id: i64) -> StoreResult<()>;
    /// Idempotent leave: absence is a silent success.
    async fn leave_challenge(&self, user_id: i64, challenge_id: i64) -> StoreResult<()>;
    async fn is_participant(&self, user_id: i64, challenge_id: i64) -> StoreResult<bool>;
    async fn count_participations(&self, user_id: i64) -> StoreResult<i64>;
    /// Most recently joined first.
    async fn list_participants(&self, challenge_id: i64) -> StoreResult<Vec<Participant>>;

    // -- progress tracker --

    /// Atomic upsert of the (user, challenge, date) entry plus the
    /// points-per-day credit when the entry transitions into completed.
    /// All-or-nothing: a failure leaves both the entry and the balance
    /// untouched. `NotFound` on an absent user or challenge.
    async fn mark_progress(
        &self,
        user_id: i64,
        challenge_id: i64,
        date: NaiveDate,
        completed: bool,
    ) -> StoreResult<MarkOutcome>;

    /// Newest entry date first.
    async fn list_progress(&self, user_id: i64, limit: Option<i64>) -> StoreResult<Vec<ProgressRow>>;

    // -- comments --

    async fn insert_comment(&self, user_id: i64, challenge_id: i64, message: &str)
        -> StoreResult<i64>;
    /// Newest first, joined with the author's username.
    async fn list_comments(&self, challenge_id: i64) -> StoreResult<Vec<CommentRow>>;

    // -- achievements --

    /// `Duplicate` on a taken code.
    async fn insert_achievement(&self, achievement: NewAchievement) -> StoreResult<i64>;
    /// `NotFound` if absent; cascades redemptions.
    async fn delete_achievement(&self, id: i64) -> StoreResult<()>;
    async fn list_achievements_for(&self, user_id: i64) -> StoreResult<Vec<AchievementStatus>>;
    async fn list_unlocked(&self, user_id: i64) -> StoreResult<Vec<Achievement>>;

    /// Atomic check-and-debit serialized per user. Never drives the balance
    /// negative; a repeat attempt reports `AlreadyRedeemed` without charging.
    async fn redeem_achievement(&self, user_id: i64, achievement_id: i64)
        -> StoreResult<RedeemOutcome>;
}

/// The single scoring rule shared by every backend: credit only when the
/// entry transitions into the completed state. Re-submitting an
/// already-complete day must not re-award.
pub fn award_due(prior: Option<bool>, completed: bool) -> bool {
    completed && prior != Some(true)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_award_on_transition_only() {
        assert!(award_due(None, true));
        assert!(award_due(Some(false), true));

        // already complete: no re-award
        assert!(!award_due(Some(true), true));

        // unmarking never awards
        assert!(!award_due(None, false));
        assert!(!award_due(Some(true), false));
        assert!(!award_due(Some(false), false));
    }
}
