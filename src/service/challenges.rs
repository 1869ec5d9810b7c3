//! Challenge registry: creation, edits, visibility, membership and comments.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::models::challenge::{DEFAULT_DURATION_DAYS, DEFAULT_POINTS_PER_DAY};
use crate::db::prelude::*;
use crate::service::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeDraft {
    pub title: String,
    pub description: Option<String>,
    pub duration_days: Option<i32>,
    #[serde(default)]
    pub is_public: bool,
    pub points_per_day: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentDraft {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChallengeDetail {
    pub challenge: Challenge,
    pub joined: bool,
    pub comments: Vec<CommentRow>,
}

fn validate(draft: &ChallengeDraft) -> ServiceResult<()> {
    if draft.title.trim().is_empty() {
        return Err(ServiceError::validation("title must not be empty"));
    }
    if draft.duration_days.is_some_and(|days| days <= 0) {
        return Err(ServiceError::validation("duration must be positive"));
    }
    if draft.points_per_day.is_some_and(|points| points < 0) {
        return Err(ServiceError::validation("points per day must not be negative"));
    }

    Ok(())
}

/// A challenge is visible to its creator, to admins, and to everyone when
/// public. Invisible challenges are reported as absent, never as forbidden.
fn visible_to(challenge: &Challenge, principal: Principal) -> bool {
    challenge.is_public || principal.can_mutate(challenge.creator_id)
}

async fn visible_challenge(
    store: &dyn Store,
    principal: Principal,
    id: i64,
) -> ServiceResult<Challenge> {
    let challenge = store
        .challenge_by_id(id)
        .await?
        .ok_or(ServiceError::NotFound("challenges"))?;

    if !visible_to(&challenge, principal) {
        return Err(ServiceError::NotFound("challenges"));
    }
    Ok(challenge)
}

pub async fn create_challenge(
    store: &dyn Store,
    principal: Principal,
    draft: ChallengeDraft,
) -> ServiceResult<i64> {
    if !matches!(principal.role, Role::Coach | Role::Admin) {
        return Err(ServiceError::Forbidden);
    }
    validate(&draft)?;

    let id = store
        .insert_challenge(NewChallenge {
            title: draft.title.trim().to_string(),
            description: draft.description.unwrap_or_default(),
            duration_days: draft.duration_days.unwrap_or(DEFAULT_DURATION_DAYS),
            is_public: draft.is_public,
            creator_id: principal.user_id,
            points_per_day: draft.points_per_day.unwrap_or(DEFAULT_POINTS_PER_DAY),
        })
        .await?;

    info!(id, creator = principal.user_id, "challenge created");
    Ok(id)
}

pub async fn edit_challenge(
    store: &dyn Store,
    principal: Principal,
    id: i64,
    draft: ChallengeDraft,
) -> ServiceResult<()> {
    let existing = store
        .challenge_by_id(id)
        .await?
        .ok_or(ServiceError::NotFound("challenges"))?;

    if !principal.can_mutate(existing.creator_id) {
        return Err(ServiceError::Forbidden);
    }
    validate(&draft)?;

    store
        .update_challenge(
            id,
            ChallengeUpdate {
                title: draft.title.trim().to_string(),
                description: draft.description.unwrap_or(existing.description),
                duration_days: draft.duration_days.unwrap_or(existing.duration_days),
                is_public: draft.is_public,
                points_per_day: draft.points_per_day.unwrap_or(existing.points_per_day),
            },
        )
        .await?;

    Ok(())
}

pub async fn delete_challenge(store: &dyn Store, principal: Principal, id: i64) -> ServiceResult<()> {
    let existing = store
        .challenge_by_id(id)
        .await?
        .ok_or(ServiceError::NotFound("challenges"))?;

    if !principal.can_mutate(existing.creator_id) {
        return Err(ServiceError::Forbidden);
    }

    store.delete_challenge(id).await?;
    info!(id, "challenge deleted");
    Ok(())
}

pub async fn list_challenges(store: &dyn Store, principal: Principal) -> ServiceResult<Vec<Challenge>> {
    Ok(store.list_visible_challenges(principal.user_id).await?)
}

pub async fn list_owned(store: &dyn Store, principal: Principal) -> ServiceResult<Vec<Challenge>> {
    Ok(store.list_owned_challenges(principal.user_id).await?)
}

pub async fn challenge_detail(
    store: &dyn Store,
    principal: Principal,
    id: i64,
) -> ServiceResult<ChallengeDetail> {
    let challenge = visible_challenge(store, principal, id).await?;
    let joined = store.is_participant(principal.user_id, id).await?;
    let comments = store.list_comments(id).await?;

    Ok(ChallengeDetail {
        challenge,
        joined,
        comments,
    })
}

pub async fn join_challenge(store: &dyn Store, principal: Principal, id: i64) -> ServiceResult<()> {
    visible_challenge(store, principal, id).await?;
    store.join_challenge(principal.user_id, id).await?;
    Ok(())
}

pub async fn leave_challenge(store: &dyn Store, principal: Principal, id: i64) -> ServiceResult<()> {
    store
        .challenge_by_id(id)
        .await?
        .ok_or(ServiceError::NotFound("challenges"))?;
    store.leave_challenge(principal.user_id, id).await?;
    Ok(())
}

pub async fn list_participants(
    store: &dyn Store,
    principal: Principal,
    id: i64,
) -> ServiceResult<Vec<Participant>> {
    let challenge = store
        .challenge_by_id(id)
        .await?
        .ok_or(ServiceError::NotFound("challenges"))?;

    if !principal.can_mutate(challenge.creator_id) {
        return Err(ServiceError::Forbidden);
    }

    Ok(store.list_participants(id).await?)
}

pub async fn add_comment(
    store: &dyn Store,
    principal: Principal,
    id: i64,
    draft: CommentDraft,
) -> ServiceResult<i64> {
    let message = draft.message.trim().to_string();
    if message.is_empty() {
        return Err(ServiceError::validation("comment must not be empty"));
    }

    visible_challenge(store, principal, id).await?;
    Ok(store.insert_comment(principal.user_id, id, &message).await?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::testutil;

    fn draft(title: &str, public: bool) -> ChallengeDraft {
        ChallengeDraft {
            title: title.to_string(),
            description: None,
            duration_days: None,
            is_public: public,
            points_per_day: None,
        }
    }

    #[tokio::test]
    async fn test_create_requires_coach_or_admin() {
        let store = testutil::store();
        let coach = testutil::seed_user(&store, "coach", Role::Coach).await;
        let user = testutil::seed_user(&store, "ana", Role::User).await;

        assert!(create_challenge(&store, coach, draft("run", true)).await.is_ok());
        assert!(matches!(
            create_challenge(&store, user, draft("walk", true)).await,
            Err(ServiceError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let store = testutil::store();
        let coach = testutil::seed_user(&store, "coach", Role::Coach).await;

        let id = create_challenge(&store, coach, draft("run", false)).await.unwrap();
        let challenge = store.challenge_by_id(id).await.unwrap().unwrap();

        assert_eq!(challenge.duration_days, 7);
        assert_eq!(challenge.points_per_day, 10);
        assert!(!challenge.is_public);

        // the creator's listing round-trips the stored fields verbatim
        let listed = list_challenges(&store, coach).await.unwrap();
        assert_eq!(listed, vec![challenge]);
    }

    #[tokio::test]
    async fn test_private_challenges_stay_hidden() {
        let store = testutil::store();
        let coach = testutil::seed_user(&store, "coach", Role::Coach).await;
        let other = testutil::seed_user(&store, "rival", Role::Coach).await;
        let admin = testutil::seed_user(&store, "root", Role::Admin).await;

        let hidden = create_challenge(&store, coach, draft("secret", false)).await.unwrap();
        create_challenge(&store, coach, draft("open", true)).await.unwrap();

        let mine = list_challenges(&store, coach).await.unwrap();
        assert_eq!(mine.len(), 2);

        let theirs = list_challenges(&store, other).await.unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].title, "open");

        // detail of an invisible challenge reads as absent
        assert!(matches!(
            challenge_detail(&store, other, hidden).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(challenge_detail(&store, admin, hidden).await.is_ok());
    }

    #[tokio::test]
    async fn test_edit_gate_admin_or_creator() {
        let store = testutil::store();
        let coach = testutil::seed_user(&store, "coach", Role::Coach).await;
        let other = testutil::seed_user(&store, "rival", Role::Coach).await;
        let admin = testutil::seed_user(&store, "root", Role::Admin).await;

        let id = create_challenge(&store, coach, draft("run", true)).await.unwrap();
        let before = store.challenge_by_id(id).await.unwrap().unwrap();

        assert!(matches!(
            edit_challenge(&store, other, id, draft("stolen", true)).await,
            Err(ServiceError::Forbidden)
        ));
        // rejected edit leaves every field as it was
        assert_eq!(store.challenge_by_id(id).await.unwrap().unwrap(), before);

        assert!(edit_challenge(&store, admin, id, draft("renamed", true)).await.is_ok());
        assert_eq!(
            store.challenge_by_id(id).await.unwrap().unwrap().title,
            "renamed"
        );

        assert!(matches!(
            delete_challenge(&store, other, id).await,
            Err(ServiceError::Forbidden)
        ));
        assert!(delete_challenge(&store, coach, id).await.is_ok());
        assert!(matches!(
            delete_challenge(&store, coach, id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_delete_cascades_dependent_rows() {
        let store = testutil::store();
        let coach = testutil::seed_user(&store, "coach", Role::Coach).await;
        let user = testutil::seed_user(&store, "ana", Role::User).await;
        let admin = testutil::seed_user(&store, "root", Role::Admin).await;

        let id = create_challenge(&store, coach, draft("run", true)).await.unwrap();
        join_challenge(&store, user, id).await.unwrap();
        store
            .mark_progress(
                user.user_id,
                id,
                chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                true,
            )
            .await
            .unwrap();
        add_comment(&store, user, id, CommentDraft { message: "done".into() })
            .await
            .unwrap();

        // admin override on someone else's challenge
        delete_challenge(&store, admin, id).await.unwrap();

        assert!(!store.is_participant(user.user_id, id).await.unwrap());
        assert!(store.list_progress(user.user_id, None).await.unwrap().is_empty());
        assert!(store.list_comments(id).await.unwrap().is_empty());

        // earned points survive the cascade
        assert_eq!(testutil::points_of(&store, user.user_id).await, 10);
    }

    #[tokio::test]
    async fn test_join_and_leave_idempotent() {
        let store = testutil::store();
        let coach = testutil::seed_user(&store, "coach", Role::Coach).await;
        let user = testutil::seed_user(&store, "ana", Role::User).await;

        let id = create_challenge(&store, coach, draft("run", true)).await.unwrap();

        join_challenge(&store, user, id).await.unwrap();
        join_challenge(&store, user, id).await.unwrap();
        assert_eq!(list_participants(&store, coach, id).await.unwrap().len(), 1);

        leave_challenge(&store, user, id).await.unwrap();
        leave_challenge(&store, user, id).await.unwrap();
        assert!(list_participants(&store, coach, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_participants_gate() {
        let store = testutil::store();
        let coach = testutil::seed_user(&store, "coach", Role::Coach).await;
        let user = testutil::seed_user(&store, "ana", Role::User).await;

        let id = create_challenge(&store, coach, draft("run", true)).await.unwrap();
        join_challenge(&store, user, id).await.unwrap();

        assert!(matches!(
            list_participants(&store, user, id).await,
            Err(ServiceError::Forbidden)
        ));
        assert_eq!(list_participants(&store, coach, id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_comments_newest_first() {
        let store = testutil::store();
        let coach = testutil::seed_user(&store, "coach", Role::Coach).await;
        let user = testutil::seed_user(&store, "ana", Role::User).await;

        let id = create_challenge(&store, coach, draft("run", true)).await.unwrap();

        add_comment(&store, user, id, CommentDraft { message: "first".into() })
            .await
            .unwrap();
        add_comment(&store, user, id, CommentDraft { message: "second".into() })
            .await
            .unwrap();
        assert!(matches!(
            add_comment(&store, user, id, CommentDraft { message: "  ".into() }).await,
            Err(ServiceError::Validation(_))
        ));

        let detail = challenge_detail(&store, user, id).await.unwrap();
        assert_eq!(detail.comments.len(), 2);
        assert_eq!(detail.comments[0].message, "second");
        assert_eq!(detail.comments[0].username, "ana");
    }
}
