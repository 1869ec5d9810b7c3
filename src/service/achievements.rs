//! Achievement catalog and the points-for-achievement exchange.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::prelude::*;
use crate::service::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AchievementDraft {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub cost: i64,
}

#[derive(Debug, Serialize)]
pub struct Unlocked {
    pub achievement_id: i64,
    pub remaining_points: i64,
}

pub async fn list_achievements(
    store: &dyn Store,
    principal: Principal,
) -> ServiceResult<Vec<AchievementStatus>> {
    Ok(store.list_achievements_for(principal.user_id).await?)
}

/// Spend points on an achievement. The store runs the check-and-debit
/// atomically; this layer only translates the outcome into the error
/// taxonomy.
pub async fn attempt_achievement(
    store: &dyn Store,
    principal: Principal,
    achievement_id: i64,
) -> ServiceResult<Unlocked> {
    match store
        .redeem_achievement(principal.user_id, achievement_id)
        .await?
    {
        RedeemOutcome::Unlocked { remaining } => {
            info!(
                user = principal.user_id,
                achievement_id, remaining, "achievement unlocked"
            );
            Ok(Unlocked {
                achievement_id,
                remaining_points: remaining,
            })
        }
        RedeemOutcome::InsufficientPoints { points, cost } => {
            Err(ServiceError::InsufficientPoints { points, cost })
        }
        RedeemOutcome::AlreadyRedeemed => Err(ServiceError::AlreadyRedeemed),
        RedeemOutcome::NotFound => Err(ServiceError::NotFound("achievements")),
    }
}

pub async fn create_achievement(
    store: &dyn Store,
    principal: Principal,
    draft: AchievementDraft,
) -> ServiceResult<i64> {
    if !principal.is_admin() {
        return Err(ServiceError::Forbidden);
    }
    if draft.code.trim().is_empty() || draft.name.trim().is_empty() {
        return Err(ServiceError::validation("code and name must not be empty"));
    }
    if draft.cost < 0 {
        return Err(ServiceError::validation("cost must not be negative"));
    }

    store
        .insert_achievement(NewAchievement {
            code: draft.code.trim().to_string(),
            name: draft.name.trim().to_string(),
            description: draft.description.unwrap_or_default(),
            cost: draft.cost,
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate { .. } => ServiceError::validation("achievement code already exists"),
            other => other.into(),
        })
}

pub async fn delete_achievement(
    store: &dyn Store,
    principal: Principal,
    achievement_id: i64,
) -> ServiceResult<()> {
    if !principal.is_admin() {
        return Err(ServiceError::Forbidden);
    }

    store.delete_achievement(achievement_id).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::testutil;

    async fn funded_user(store: &dyn Store, username: &str, points: i64) -> Principal {
        let coach = testutil::seed_user(store, &format!("{username}-coach"), Role::Coach).await;
        let user = testutil::seed_user(store, username, Role::User).await;

        // one completed day per points_per_day chunk
        let challenge = store
            .insert_challenge(NewChallenge {
                title: "funding".to_string(),
                description: String::new(),
                duration_days: 30,
                is_public: true,
                creator_id: coach.user_id,
                points_per_day: points,
            })
            .await
            .unwrap();
        store.join_challenge(user.user_id, challenge).await.unwrap();
        store
            .mark_progress(
                user.user_id,
                challenge,
                chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                true,
            )
            .await
            .unwrap();

        user
    }

    #[tokio::test]
    async fn test_redeem_debits_exactly_once() {
        let store = testutil::store();
        let user = funded_user(&store, "ana", 50).await;
        let badge = testutil::seed_achievement(&store, "early-bird", 30).await;

        let unlocked = attempt_achievement(&store, user, badge).await.unwrap();
        assert_eq!(unlocked.remaining_points, 20);
        assert_eq!(testutil::points_of(&store, user.user_id).await, 20);

        // repeat attempt reports the unlock, never re-charges
        assert!(matches!(
            attempt_achievement(&store, user, badge).await,
            Err(ServiceError::AlreadyRedeemed)
        ));
        assert_eq!(testutil::points_of(&store, user.user_id).await, 20);
    }

    #[tokio::test]
    async fn test_insufficient_points_leaves_balance() {
        let store = testutil::store();
        let user = funded_user(&store, "ana", 10).await;
        let badge = testutil::seed_achievement(&store, "marathon", 100).await;

        assert!(matches!(
            attempt_achievement(&store, user, badge).await,
            Err(ServiceError::InsufficientPoints { points: 10, cost: 100 })
        ));
        assert_eq!(testutil::points_of(&store, user.user_id).await, 10);
    }

    #[tokio::test]
    async fn test_already_redeemed_wins_over_balance() {
        let store = testutil::store();
        let user = funded_user(&store, "ana", 30).await;
        let cheap = testutil::seed_achievement(&store, "cheap", 20).await;
        let other = testutil::seed_achievement(&store, "other", 10).await;

        attempt_achievement(&store, user, cheap).await.unwrap();
        attempt_achievement(&store, user, other).await.unwrap();
        assert_eq!(testutil::points_of(&store, user.user_id).await, 0);

        // balance is now below cost, but the repeat still reports redeemed
        assert!(matches!(
            attempt_achievement(&store, user, cheap).await,
            Err(ServiceError::AlreadyRedeemed)
        ));
    }

    #[tokio::test]
    async fn test_unknown_achievement() {
        let store = testutil::store();
        let user = funded_user(&store, "ana", 10).await;

        assert!(matches!(
            attempt_achievement(&store, user, 9999).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_carries_unlock_flag() {
        let store = testutil::store();
        let user = funded_user(&store, "ana", 50).await;
        let cheap = testutil::seed_achievement(&store, "cheap", 10).await;
        testutil::seed_achievement(&store, "pricey", 40).await;

        attempt_achievement(&store, user, cheap).await.unwrap();

        let listing = list_achievements(&store, user).await.unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().find(|a| a.code == "cheap").unwrap().unlocked);
        assert!(!listing.iter().find(|a| a.code == "pricey").unwrap().unlocked);
    }

    #[tokio::test]
    async fn test_admin_catalog_management() {
        let store = testutil::store();
        let admin = testutil::seed_user(&store, "root", Role::Admin).await;
        let user = testutil::seed_user(&store, "ana", Role::User).await;

        let draft = AchievementDraft {
            code: "streak-7".to_string(),
            name: "One week streak".to_string(),
            description: None,
            cost: 50,
        };

        assert!(matches!(
            create_achievement(&store, user, draft.clone()).await,
            Err(ServiceError::Forbidden)
        ));

        let id = create_achievement(&store, admin, draft.clone()).await.unwrap();
        assert!(matches!(
            create_achievement(&store, admin, draft).await,
            Err(ServiceError::Validation(_))
        ));

        delete_achievement(&store, admin, id).await.unwrap();
        assert!(matches!(
            delete_achievement(&store, admin, id).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
